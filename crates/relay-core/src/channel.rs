//! 频道注册表协作契约。
//!
//! ## 核心意图（Why）
//! - 订阅会话只依赖这里的 trait，不感知频道存储、离线消息保留或鉴权的具体实现；
//! - 测试可以替换为计数/记录型替身，精确断言调用顺序与次数。
//!
//! ## 行为契约（What）
//! - `get`：按 key 查找，未命中返回 [`ChannelError::NotFound`]；
//! - `create`：为 key 创建频道；并发创建同一 key 时实现可以返回已存在的频道；
//! - `authenticate`：校验 `(token, key)`；
//! - `replay`：把 `mid` 之后的离线消息直接写到连接上，“之后”的判定与分批由频道负责；
//! - `register`/`deregister`：登记/注销连接，注册表只应保存非拥有引用；
//!   `deregister` 为尽力而为，失败由调用方记录日志，不再上抛。
//!
//! ## 风险提示（Trade-offs）
//! - 所有方法都可能被大量会话并发调用，实现需自行保证线程安全。

use std::{io, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::ConnectionHandle;

/// 频道协作方的失败分类。
#[derive(Debug, Error)]
pub enum ChannelError {
    /// 注册表中不存在该 key。
    #[error("channel `{key}` does not exist")]
    NotFound { key: String },

    /// 创建频道失败。
    #[error("channel `{key}` could not be created: {detail}")]
    CreateFailed { key: String, detail: String },

    /// 令牌未通过校验。
    #[error("token rejected for channel `{key}`")]
    AuthFailed { key: String },

    /// 频道拒绝了登记/注销等状态变更。
    #[error("channel `{key}` rejected the operation: {detail}")]
    Rejected { key: String, detail: String },

    /// 向连接写入时失败。
    #[error("channel i/o failure: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::NotFound { .. } => "relay.channel.not_found",
            ChannelError::CreateFailed { .. } => "relay.channel.create_failed",
            ChannelError::AuthFailed { .. } => "relay.channel.auth_failed",
            ChannelError::Rejected { .. } => "relay.channel.rejected",
            ChannelError::Io(_) => "relay.channel.io",
        }
    }
}

/// 一个具名的发布/订阅频道。
#[async_trait]
pub trait Channel: Send + Sync {
    /// 校验订阅令牌。
    async fn authenticate(&self, token: &str, key: &str) -> Result<(), ChannelError>;

    /// 将 `mid` 之后的离线消息写到 `conn`。
    async fn replay(
        &self,
        conn: &ConnectionHandle,
        mid: i64,
        key: &str,
    ) -> Result<(), ChannelError>;

    /// 登记连接以接收后续实时消息。
    async fn register(
        &self,
        conn: &ConnectionHandle,
        mid: i64,
        key: &str,
    ) -> Result<(), ChannelError>;

    /// 注销先前登记的连接。
    async fn deregister(
        &self,
        conn: &ConnectionHandle,
        mid: i64,
        key: &str,
    ) -> Result<(), ChannelError>;
}

/// 会话持有的频道引用。
pub type SharedChannel = Arc<dyn Channel>;

/// 按 key 索引频道的注册表。
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    async fn get(&self, key: &str) -> Result<SharedChannel, ChannelError>;

    async fn create(&self, key: &str) -> Result<SharedChannel, ChannelError>;
}
