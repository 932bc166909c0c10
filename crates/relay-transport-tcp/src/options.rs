use std::net::SocketAddr;

use relay_core::RelayConfig;
use socket2::SockRef;
use tokio::net::TcpStream;

use crate::TransportError;

/// 每个接入连接上设置的套接字选项。
///
/// # 教案式注释
/// - **意图 (Why)**：长连接订阅依赖保活探测发现半开连接，缓冲区大小决定单连接内存占用；
/// - **逻辑 (How)**：借助 `socket2::SockRef` 直接作用于 Tokio 流的底层描述符，无需转移所有权；
/// - **契约 (What)**：按保活、接收缓冲、发送缓冲的顺序设置，遇到首个失败即返回
///   [`TransportError::Configure`]，调用方据此丢弃该连接。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketOptions {
    pub keepalive: bool,
    pub recv_buffer_bytes: usize,
    pub send_buffer_bytes: usize,
}

impl SocketOptions {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            keepalive: config.tcp_keepalive,
            recv_buffer_bytes: config.read_buffer_bytes,
            send_buffer_bytes: config.write_buffer_bytes,
        }
    }

    /// 将选项应用到已接受的连接。
    pub fn apply(&self, stream: &TcpStream) -> Result<(), TransportError> {
        let sock = SockRef::from(stream);
        sock.set_keepalive(self.keepalive)
            .map_err(|source| configure("SO_KEEPALIVE", source))?;
        sock.set_recv_buffer_size(self.recv_buffer_bytes)
            .map_err(|source| configure("SO_RCVBUF", source))?;
        sock.set_send_buffer_size(self.send_buffer_bytes)
            .map_err(|source| configure("SO_SNDBUF", source))?;
        Ok(())
    }
}

/// 接入循环在派发连接任务之前对套接字执行的准备步骤。
///
/// - 返回错误时接入循环记录日志并只丢弃该连接，随后继续接受；
/// - [`SocketOptions`] 是默认实现；其他实现可通过
///   [`TcpAcceptor::with_preparation`](crate::TcpAcceptor::with_preparation) 替换。
pub trait PrepareStream: Send + Sync + 'static {
    fn prepare(&self, stream: &TcpStream, peer: SocketAddr) -> Result<(), TransportError>;
}

impl PrepareStream for SocketOptions {
    fn prepare(&self, stream: &TcpStream, _peer: SocketAddr) -> Result<(), TransportError> {
        self.apply(stream)
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

fn configure(option: &'static str, source: std::io::Error) -> TransportError {
    TransportError::Configure { option, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn options_reach_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let _client = client.expect("connect");
        let (stream, _) = accepted.expect("accept");

        let options = SocketOptions {
            keepalive: true,
            recv_buffer_bytes: 4096,
            send_buffer_bytes: 4096,
        };
        options.apply(&stream).expect("apply");
        assert!(SockRef::from(&stream).keepalive().expect("read keepalive"));
    }

    #[test]
    fn defaults_follow_config_defaults() {
        let options = SocketOptions::default();
        assert!(!options.keepalive);
        assert_eq!(options.recv_buffer_bytes, 1024);
        assert_eq!(options.send_buffer_bytes, 1024);
    }
}
