use std::time::Duration;

use bytes::Bytes;
use relay_core::{ConfigError, RelayConfig};

/// 会话策略：从进程配置投影出的显式参数。
///
/// # 教案式注释
/// - **意图 (Why)**：鉴权开关与默认心跳以参数形式传入会话，测试可以直接构造，
///   调用点可见，不依赖任何全局状态；
/// - **契约 (What)**：
///   - `auth_required`：为 `true` 时频道必须预先存在且令牌须通过校验；
///   - `default_heartbeat`：客户端省略心跳参数时使用，大于 0；
///   - `heartbeat_marker`/`heartbeat_ack`：心跳探针字节与应答字节序列。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPolicy {
    pub auth_required: bool,
    pub default_heartbeat: Duration,
    pub heartbeat_marker: u8,
    pub heartbeat_ack: Bytes,
}

impl SessionPolicy {
    /// 心跳探针与应答的默认取值。
    pub const DEFAULT_MARKER: u8 = b'h';
    pub const DEFAULT_ACK: &'static [u8] = b"h";

    /// 以默认心跳字节构造策略。
    pub fn new(auth_required: bool, default_heartbeat: Duration) -> Self {
        Self {
            auth_required,
            default_heartbeat,
            heartbeat_marker: Self::DEFAULT_MARKER,
            heartbeat_ack: Bytes::from_static(Self::DEFAULT_ACK),
        }
    }

    /// 从已加载的配置投影。
    pub fn from_config(config: &RelayConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            auth_required: config.auth,
            default_heartbeat: config.heartbeat_interval(),
            heartbeat_marker: config.heartbeat_marker_byte()?,
            heartbeat_ack: Bytes::copy_from_slice(config.heartbeat_ack.as_bytes()),
        })
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::new(false, Duration::from_secs(30))
    }
}
