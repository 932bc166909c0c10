//! # relay-session
//!
//! ## 定位与职责（Why）
//! - 承接解码后的 [`Command`](relay_core::Command)：[`dispatch`] 按命令名选择处理器，
//!   目前只有 `sub`；
//! - [`SubscriptionSession`] 把一次订阅建模为显式状态机 [`SessionState`]，
//!   在单条连接上串行完成参数解析、频道绑定、鉴权、离线回放、登记与心跳监督。
//!
//! ## 协作边界（What）
//! - 只依赖 `relay-core` 的 [`ChannelRegistry`](relay_core::ChannelRegistry)/
//!   [`Channel`](relay_core::Channel) 契约，不感知频道存储；
//! - 鉴权开关与默认心跳经 [`SessionPolicy`] 显式传入；
//! - 任何失败都不写回客户端，调用方根据 [`SessionReport`] 记录日志并关闭连接。
//!
//! ## 清理语义（How）
//! - 到达登记后，注销义务由 [`RegistrationGuard`] 持有：正常路径显式释放，
//!   取消或恐慌展开时由 `Drop` 投递到运行时，保证至多注销一次。

mod dispatch;
mod error;
mod guard;
mod heartbeat;
mod policy;
mod request;
mod session;
mod state;

pub use dispatch::{SUBSCRIBE, dispatch};
pub use error::{SessionError, SessionPhase};
pub use guard::RegistrationGuard;
pub use heartbeat::Heartbeat;
pub use policy::SessionPolicy;
pub use request::SubscribeRequest;
pub use session::{SessionReport, SubscriptionSession};
pub use state::SessionState;
