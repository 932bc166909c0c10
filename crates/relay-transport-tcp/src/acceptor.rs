use std::{
    fmt,
    future::{self, Future},
    io,
    net::SocketAddr,
    pin::pin,
    sync::Arc,
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpStream, lookup_host},
    time,
};
use tracing::{error, info, warn};

use crate::{ConnectionContext, PrepareStream, TransportError, handle_connection};

/// `accept` 失败后的退避时间，避免描述符耗尽时空转。
const ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

/// 订阅中继的 TCP 接入器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 把“解析并绑定地址 → 循环接受 → 配置套接字 → 派发处理任务”收敛到一个类型，
///   绑定失败对调用方致命，其余失败都在循环内就地恢复。
///
/// ## 逻辑 (How)
/// - [`bind`](Self::bind)：`lookup_host` 解析地址，依次尝试绑定每个候选地址；
/// - [`serve_until`](Self::serve_until)：`select!` 同时等待停止信号与下一个连接；
///   每个连接先执行 [`PrepareStream`]（默认为上下文中的 [`SocketOptions`](crate::SocketOptions)），
///   失败则直接丢弃，成功则 `tokio::spawn` 一个 [`handle_connection`] 任务；
/// - `accept` 出错时记录日志、短暂退避后继续。
///
/// ## 契约 (What)
/// - 接入循环从不等待任何连接任务；
/// - 停止信号只关闭监听套接字，不终止进行中的会话。
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    context: Arc<ConnectionContext>,
    preparation: Arc<dyn PrepareStream>,
}

impl TcpAcceptor {
    /// 解析并绑定监听地址。
    pub async fn bind(addr: &str, context: ConnectionContext) -> Result<Self, TransportError> {
        let candidates = lookup_host(addr)
            .await
            .map_err(|source| TransportError::Resolve {
                addr: addr.to_owned(),
                source,
            })?;

        let mut last_err = None;
        for candidate in candidates {
            match TcpListener::bind(candidate).await {
                Ok(listener) => {
                    let local_addr = listener.local_addr().map_err(|source| {
                        TransportError::Bind {
                            addr: addr.to_owned(),
                            source,
                        }
                    })?;
                    return Ok(Self {
                        listener,
                        local_addr,
                        preparation: Arc::new(context.options),
                        context: Arc::new(context),
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(match last_err {
            Some(source) => TransportError::Bind {
                addr: addr.to_owned(),
                source,
            },
            None => TransportError::Resolve {
                addr: addr.to_owned(),
                source: io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"),
            },
        })
    }

    /// 替换派发前的套接字准备步骤。
    pub fn with_preparation(mut self, preparation: impl PrepareStream) -> Self {
        self.preparation = Arc::new(preparation);
        self
    }

    /// 实际绑定的地址；绑定端口 0 时可据此获知系统分配的端口。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 持续接受连接，直到 `shutdown` 完成。
    pub async fn serve_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        accept_loop(
            &self.listener,
            self.local_addr,
            &self.context,
            self.preparation.as_ref(),
            shutdown,
        )
        .await
    }

    /// 持续接受连接，永不返回。
    pub async fn serve(self) {
        self.serve_until(future::pending()).await
    }
}

impl fmt::Debug for TcpAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpAcceptor")
            .field("local_addr", &self.local_addr)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// 绑定 `addr` 并服务到进程结束；只有解析或绑定失败时返回。
pub async fn serve(addr: &str, context: ConnectionContext) -> Result<(), TransportError> {
    TcpAcceptor::bind(addr, context).await?.serve().await;
    Ok(())
}

/// 接入循环的连接来源。
trait Incoming {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Incoming for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

async fn accept_loop<L, F>(
    incoming: &L,
    local_addr: SocketAddr,
    context: &Arc<ConnectionContext>,
    preparation: &dyn PrepareStream,
    shutdown: F,
) where
    L: Incoming,
    F: Future<Output = ()>,
{
    let mut shutdown = pin!(shutdown);
    info!(addr = %local_addr, "accepting connections");

    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => {
                info!(addr = %local_addr, "shutdown requested; closing listener");
                break;
            }
            accepted = incoming.accept() => match accepted {
                Ok((stream, peer)) => admit(stream, peer, context, preparation),
                Err(source) => {
                    let err = TransportError::Accept(source);
                    error!(code = err.code(), error = %err, "accept failed; retrying");
                    time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }
}

fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    context: &Arc<ConnectionContext>,
    preparation: &dyn PrepareStream,
) {
    if let Err(err) = preparation.prepare(&stream, peer) {
        warn!(
            peer = %peer,
            code = err.code(),
            error = %err,
            "socket configuration failed; dropping connection"
        );
        return;
    }
    tokio::spawn(handle_connection(stream, peer, Arc::clone(context)));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use relay_codec_resp::encode_command;
    use relay_core::MemoryRegistry;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        sync::oneshot,
    };

    use super::*;
    use crate::SocketOptions;

    /// 先返回若干次 `accept` 错误，再转交真实监听套接字。
    struct FailingFirst {
        listener: TcpListener,
        failures: AtomicUsize,
    }

    impl Incoming for FailingFirst {
        fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
            async move {
                if self.failures.load(Ordering::SeqCst) > 0 {
                    self.failures.fetch_sub(1, Ordering::SeqCst);
                    return Err(io::Error::other("too many open files"));
                }
                self.listener.accept().await
            }
        }
    }

    #[tokio::test]
    async fn accept_errors_are_survived() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let incoming = FailingFirst {
            listener,
            failures: AtomicUsize::new(3),
        };
        let context = Arc::new(ConnectionContext::new(Arc::new(MemoryRegistry::new(4))));
        let options = SocketOptions::default();
        let (stop, stopped) = oneshot::channel::<()>();

        let serving = accept_loop(
            &incoming,
            addr,
            &context,
            &options,
            async move {
                let _ = stopped.await;
            },
        );
        let client = async move {
            let mut client = TcpStream::connect(addr).await.expect("connect");
            client
                .write_all(&encode_command(["sub", "k", "1"]))
                .await
                .expect("send");
            client.write_all(b"h").await.expect("marker");
            let mut ack = [0u8; 1];
            time::timeout(Duration::from_secs(5), client.read_exact(&mut ack))
                .await
                .expect("served after accept errors")
                .expect("ack");
            assert_eq!(&ack, b"h");
            let _ = stop.send(());
        };

        tokio::join!(serving, client);
        assert_eq!(incoming.failures.load(Ordering::SeqCst), 0);
    }
}
