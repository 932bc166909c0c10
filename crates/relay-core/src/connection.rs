//! 连接句柄：会话与频道共享同一条连接的写半部。
//!
//! ## 契约（What）
//! - 读半部由会话任务独占（帧解码与心跳读取）；写半部包在 [`ConnectionHandle`] 中，
//!   会话（心跳应答）与频道（离线回放、实时推送）并发写入时由异步互斥锁串行化；
//! - 频道注册表只应保存 [`WeakConnection`]，连接的生命周期完全归属会话任务。

use std::{
    fmt,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex as AsyncMutex,
};

type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// 进程内唯一的连接编号。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// 原始编号，用于日志字段。
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct ConnectionInner {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    writer: AsyncMutex<BoxedWriter>,
    abandoned: AtomicBool,
}

/// 一条订阅连接的共享写句柄。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 频道回放与实时推送需要“直接写到连接上”，而连接的读半部被会话的心跳循环占用，
///   因此写半部必须可共享；
///
/// ## 逻辑 (How)
/// - 内部以 `tokio::sync::Mutex` 包裹类型擦除的 `AsyncWrite`，每次 [`write_all`](Self::write_all)
///   在持锁期间完成写入与 `flush`，保证帧不会被其他写者交错；
/// - 克隆只增加 `Arc` 引用计数；[`downgrade`](Self::downgrade) 产生非拥有引用。
///
/// ## 契约 (What)
/// - `id`：进程内唯一，注册表据此索引登记；
/// - `peer_addr`：TCP 连接的对端地址，内存流等场景为 `None`；
/// - [`shutdown`](Self::shutdown)：关闭写方向，由接入层在会话结束时调用且只调用一次；
/// - [`abandon`](Self::abandon)：写入被中途放弃、帧边界已不可信时调用，此后所有写入立即失败。
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    /// 以任意异步写半部构造句柄并分配新编号。
    pub fn new<W>(peer_addr: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::next(),
                peer_addr,
                writer: AsyncMutex::new(Box::pin(writer)),
                abandoned: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    /// 写出完整缓冲并刷新。
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut writer = self.inner.writer.lock().await;
        if self.is_abandoned() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection abandoned after an unfinished write",
            ));
        }
        writer.write_all(buf).await?;
        writer.flush().await
    }

    /// 标记连接不可再写；会话的下一次写入（如心跳应答）将失败并结束会话。
    pub fn abandon(&self) {
        self.inner.abandoned.store(true, Ordering::Release);
    }

    pub fn is_abandoned(&self) -> bool {
        self.inner.abandoned.load(Ordering::Acquire)
    }

    /// 关闭写方向。
    pub async fn shutdown(&self) -> io::Result<()> {
        let mut writer = self.inner.writer.lock().await;
        writer.shutdown().await
    }

    /// 生成不延长连接生命周期的弱引用。
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .finish_non_exhaustive()
    }
}

/// 注册表持有的非拥有连接引用。
#[derive(Clone)]
pub struct WeakConnection {
    id: ConnectionId,
    inner: Weak<ConnectionInner>,
}

impl WeakConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 连接仍存活时返回可写句柄。
    pub fn upgrade(&self) -> Option<ConnectionHandle> {
        self.inner.upgrade().map(|inner| ConnectionHandle { inner })
    }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnection")
            .field("id", &self.id)
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
