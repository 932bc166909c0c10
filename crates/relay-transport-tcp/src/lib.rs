//! # relay-transport-tcp
//!
//! ## 定位与职责（Why）
//! - 订阅中继的连接接入层：绑定监听地址，为每个接入连接设置套接字选项，
//!   并为其派发一个独立的 Tokio 任务执行“解码 → 分发 → 会话”；
//! - 连接任务在任何结局下（包括恢复的恐慌）都恰好关闭连接一次。
//!
//! ## 错误传播（What）
//! - 只有地址解析与绑定失败返回给调用方，见 [`TransportError`]；
//! - `accept` 失败与套接字选项失败在循环内记录并恢复，会话错误只停留在各自连接内。

mod acceptor;
mod error;
mod handler;
mod options;

pub use acceptor::{TcpAcceptor, serve};
pub use error::TransportError;
pub use handler::{ConnectionContext, handle_connection};
pub use options::{PrepareStream, SocketOptions};
