use std::io;

use thiserror::Error;

/// 接入层错误。
///
/// # 教案式说明
/// - **契约 (What)**：只有 [`Resolve`](Self::Resolve) 与 [`Bind`](Self::Bind) 会从
///   [`TcpAcceptor::bind`](crate::TcpAcceptor::bind) 返回给调用方；
///   [`Accept`](Self::Accept) 与 [`Configure`](Self::Configure) 在接入循环内记录后恢复，
///   前者继续循环，后者丢弃该连接。
/// - **错误码**：[`code`](Self::code) 与日志字段 `code` 对齐。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve listen address `{addr}`")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind `{addr}`")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed")]
    Accept(#[source] io::Error),

    /// 设置套接字选项失败，`option` 为选项名。
    #[error("failed to set {option}")]
    Configure {
        option: &'static str,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Resolve { .. } => "relay.transport.resolve",
            TransportError::Bind { .. } => "relay.transport.bind",
            TransportError::Accept(_) => "relay.transport.accept",
            TransportError::Configure { .. } => "relay.transport.configure",
        }
    }
}
