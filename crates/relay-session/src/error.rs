use std::{io, time::Duration};

use relay_core::ChannelError;
use thiserror::Error;

/// 会话失败所处的阶段。
///
/// - `Setup`：登记之前失败，不欠注销；
/// - `Registered`：登记之后失败，注销必定已被触发。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Setup,
    Registered,
}

/// 分发与订阅会话的失败分类。
///
/// # 教案式说明
/// - **意图 (Why)**：每一种失败都对连接致命，但清理责任不同；枚举按阶段划分，
///   让接入层与日志无需了解状态机细节即可判断是否发生过登记；
/// - **契约 (What)**：
///   - 所有变体都不会写回客户端，唯一可观测效果是连接关闭；
///   - [`code`](Self::code) 返回稳定错误码，用于日志字段与告警聚合；
///   - [`phase`](Self::phase) 返回失败阶段；
/// - **风险 (Trade-offs)**：协作方错误以 `source` 保留，日志中展示完整链路，
///   但不会携带令牌原文。
#[derive(Debug, Error)]
pub enum SessionError {
    /// 命令名未被识别。
    #[error("unknown command `{name}`")]
    UnknownCommand { name: String },

    /// 必填参数缺失或参数格式非法。
    #[error("bad subscribe arguments: {detail}")]
    BadArguments { detail: String },

    /// 鉴权模式下频道不存在。
    #[error("channel `{key}` not found")]
    ChannelNotFound { key: String },

    #[error("failed to create channel `{key}`")]
    ChannelCreateFailed {
        key: String,
        #[source]
        source: ChannelError,
    },

    #[error("authentication failed for channel `{key}`")]
    AuthFailed {
        key: String,
        #[source]
        source: ChannelError,
    },

    #[error("offline replay failed for channel `{key}`")]
    ReplayFailed {
        key: String,
        #[source]
        source: ChannelError,
    },

    #[error("failed to register connection on channel `{key}`")]
    RegisterFailed {
        key: String,
        #[source]
        source: ChannelError,
    },

    /// 心跳间隔内未收到任何字节。
    #[error("no heartbeat within {interval:?}")]
    HeartbeatTimeout { interval: Duration },

    #[error("unexpected heartbeat byte 0x{byte:02x}")]
    UnknownHeartbeatByte { byte: u8 },

    #[error("failed to write heartbeat acknowledgement")]
    HeartbeatWriteFailed(#[source] io::Error),

    /// 读取心跳时连接关闭或出错。
    #[error("connection error during heartbeat")]
    ConnectionError(#[source] io::Error),
}

impl SessionError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::UnknownCommand { .. } => "relay.session.unknown_command",
            SessionError::BadArguments { .. } => "relay.session.bad_arguments",
            SessionError::ChannelNotFound { .. } => "relay.session.channel_not_found",
            SessionError::ChannelCreateFailed { .. } => "relay.session.channel_create_failed",
            SessionError::AuthFailed { .. } => "relay.session.auth_failed",
            SessionError::ReplayFailed { .. } => "relay.session.replay_failed",
            SessionError::RegisterFailed { .. } => "relay.session.register_failed",
            SessionError::HeartbeatTimeout { .. } => "relay.session.heartbeat_timeout",
            SessionError::UnknownHeartbeatByte { .. } => "relay.session.unknown_heartbeat_byte",
            SessionError::HeartbeatWriteFailed(_) => "relay.session.heartbeat_write_failed",
            SessionError::ConnectionError(_) => "relay.session.connection_error",
        }
    }

    /// 失败所处阶段。
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionError::HeartbeatTimeout { .. }
            | SessionError::UnknownHeartbeatByte { .. }
            | SessionError::HeartbeatWriteFailed(_)
            | SessionError::ConnectionError(_) => SessionPhase::Registered,
            _ => SessionPhase::Setup,
        }
    }

    pub(crate) fn bad_arguments(detail: impl Into<String>) -> Self {
        SessionError::BadArguments {
            detail: detail.into(),
        }
    }
}
