//! # relay-core
//!
//! ## 定位与职责（Why）
//! - 承载订阅中继各层共享的契约：连接句柄 [`ConnectionHandle`]、频道注册表协作接口
//!   [`ChannelRegistry`]/[`Channel`]、进程配置 [`RelayConfig`]；
//! - 提供契约的内存实现 [`memory::MemoryRegistry`]，既是进程默认的频道存储，也是测试中
//!   行为确定的替身。
//!
//! ## 架构嵌入（Where）
//! - 依赖 `relay-codec-resp` 复用命令类型与投递编码；
//! - 被 `relay-session`（状态机只面向 trait）与 `relay-transport-tcp`（接入层）依赖。
//!
//! ## 并发约束（What）
//! - 所有协作接口均为 `Send + Sync`，由实现自行保证并发安全；核心不额外加锁。

pub mod channel;
pub mod config;
pub mod connection;
pub mod memory;

pub use channel::{Channel, ChannelError, ChannelRegistry, SharedChannel};
pub use config::{ConfigError, RelayConfig};
pub use connection::{ConnectionHandle, ConnectionId, WeakConnection};
pub use memory::{DEFAULT_DELIVERY_TIMEOUT, MemoryChannel, MemoryRegistry, StoredMessage};
pub use relay_codec_resp::Command;
