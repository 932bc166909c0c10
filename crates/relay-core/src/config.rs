//! 进程配置：TOML 文件反序列化为 [`RelayConfig`]，再投影给各组件的显式参数。
//!
//! ## 契约（What）
//! - 所有字段均有默认值，空文件即为合法配置；未知字段被拒绝；
//! - [`RelayConfig::validate`] 在加载时执行，组件拿到的配置一定通过校验；
//! - 鉴权开关、默认心跳等策略不以全局变量存在，由调用方从配置投影后传入会话。

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use relay_codec_resp::{DecodeLimits, LineTerminator};
use serde::Deserialize;
use thiserror::Error;

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{}`: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 订阅中继的进程级配置。
///
/// # 教案式注释
/// - **契约 (What)**：
///   - `addr`：监听地址，允许主机名，启动时解析；
///   - `tcp_keepalive`/`read_buffer_bytes`/`write_buffer_bytes`：每个接入连接的套接字选项；
///   - `heartbeat_secs`：客户端未指定心跳间隔时的默认值，必须大于 0；
///   - `auth`：为 `true` 时要求频道预先存在并校验令牌；
///   - `line_terminator`、`max_*`：帧解码策略与上界；
///   - `heartbeat_marker`/`heartbeat_ack`：心跳探针字节（恰好 1 字节）与应答；
///   - `offline_capacity`：内存频道每个 key 保留的离线消息条数；
///   - `delivery_timeout_ms`：内存频道单次投递的时限，超时的连接被放弃；
///   - `log_level`：未设置 `RUST_LOG` 时的日志过滤级别。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub addr: String,
    pub tcp_keepalive: bool,
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,
    pub heartbeat_secs: u64,
    pub auth: bool,
    pub line_terminator: LineTerminator,
    pub max_arguments: usize,
    pub max_argument_bytes: usize,
    pub max_header_bytes: usize,
    pub heartbeat_marker: String,
    pub heartbeat_ack: String,
    pub offline_capacity: usize,
    pub delivery_timeout_ms: u64,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:6969".to_owned(),
            tcp_keepalive: false,
            read_buffer_bytes: 1024,
            write_buffer_bytes: 1024,
            heartbeat_secs: 30,
            auth: false,
            line_terminator: LineTerminator::Crlf,
            max_arguments: DecodeLimits::DEFAULT_MAX_ARGUMENTS,
            max_argument_bytes: DecodeLimits::DEFAULT_MAX_ARGUMENT_BYTES,
            max_header_bytes: DecodeLimits::DEFAULT_MAX_HEADER_BYTES,
            heartbeat_marker: "h".to_owned(),
            heartbeat_ack: "h".to_owned(),
            offline_capacity: 64,
            delivery_timeout_ms: 5_000,
            log_level: "info".to_owned(),
        }
    }
}

impl RelayConfig {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取并校验 TOML 文件。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 校验字段之间与字段本身的约束。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.trim().is_empty() {
            return Err(invalid("addr", "listen address must not be empty"));
        }
        if self.heartbeat_secs == 0 {
            return Err(invalid("heartbeat_secs", "must be greater than zero"));
        }
        self.heartbeat_marker_byte()?;
        if self.delivery_timeout_ms == 0 {
            return Err(invalid("delivery_timeout_ms", "must be greater than zero"));
        }
        if self.heartbeat_ack.is_empty() {
            return Err(invalid("heartbeat_ack", "must not be empty"));
        }
        for (field, value) in [
            ("max_arguments", self.max_arguments),
            ("max_argument_bytes", self.max_argument_bytes),
            ("max_header_bytes", self.max_header_bytes),
            ("read_buffer_bytes", self.read_buffer_bytes),
            ("write_buffer_bytes", self.write_buffer_bytes),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        Ok(())
    }

    /// 帧解码上界。
    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_arguments: self.max_arguments,
            max_argument_bytes: self.max_argument_bytes,
            max_header_bytes: self.max_header_bytes,
            terminator: self.line_terminator,
        }
    }

    /// 默认心跳间隔。
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// 内存频道单次投递时限。
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// 心跳探针字节；配置必须恰为 1 字节。
    pub fn heartbeat_marker_byte(&self) -> Result<u8, ConfigError> {
        match self.heartbeat_marker.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(invalid("heartbeat_marker", "must be exactly one byte")),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_owned(),
    }
}
