use std::io;

use thiserror::Error;

/// 解码层错误。全部对所在连接致命，调用方只需记录日志并关闭连接。
///
/// # 教案式注释
/// - **契约 (What)**：每个变体通过 [`DecodeError::code`] 暴露稳定错误码，便于日志聚合；
///   变体携带的上下文只用于服务端诊断，不会写回客户端。
/// - **风险 (Trade-offs)**：`MalformedHeader` 中保存的行内容经过截断与有损 UTF-8 转换，
///   仅用于排障展示。
#[derive(Debug, Error)]
pub enum DecodeError {
    /// 长度行前缀不符、过短或数字解析失败。
    #[error("malformed `{prefix}` header line {line:?}: {reason}")]
    MalformedHeader {
        prefix: char,
        line: String,
        reason: &'static str,
    },

    /// 流在声明的内容读满之前结束；`unit` 说明 `expected`/`received` 的计量单位。
    #[error("frame truncated: expected {expected} {unit}, stream ended after {received}")]
    TruncatedFrame {
        unit: &'static str,
        expected: usize,
        received: usize,
    },

    /// 数据段读满后尾部不是终止符，说明实际长度与声明长度不一致。
    #[error("argument length does not match declared size {declared}")]
    DecodeSizeMismatch { declared: usize },

    /// 参数个数小于 1。
    #[error("command declares no arguments")]
    EmptyCommand,

    /// 声明的尺寸超过 [`DecodeLimits`](crate::DecodeLimits)。
    #[error("{what} {declared} exceeds limit {limit}")]
    FrameTooLarge {
        what: &'static str,
        declared: usize,
        limit: usize,
    },

    /// 在任何命令字节到达之前对端已关闭。
    #[error("connection closed before a command arrived")]
    ConnectionClosed,

    /// 底层读取失败。
    #[error("stream read failed: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::MalformedHeader { .. } => "relay.decode.malformed_header",
            DecodeError::TruncatedFrame { .. } => "relay.decode.truncated_frame",
            DecodeError::DecodeSizeMismatch { .. } => "relay.decode.size_mismatch",
            DecodeError::EmptyCommand => "relay.decode.empty_command",
            DecodeError::FrameTooLarge { .. } => "relay.decode.frame_too_large",
            DecodeError::ConnectionClosed => "relay.decode.connection_closed",
            DecodeError::Io(_) => "relay.decode.io",
        }
    }

    pub(crate) fn malformed(prefix: u8, raw: &[u8], reason: &'static str) -> Self {
        const SHOWN: usize = 32;
        let shown = &raw[..raw.len().min(SHOWN)];
        DecodeError::MalformedHeader {
            prefix: char::from(prefix),
            line: String::from_utf8_lossy(shown).into_owned(),
            reason,
        }
    }
}
