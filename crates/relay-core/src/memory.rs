//! # 内存频道注册表
//!
//! ## 核心意图（Why）
//! - 给协作契约一个进程内实现：单节点部署可直接使用，测试中行为确定；
//! - 以 `DashMap` 按 key 分片存储频道，查找与创建在多个会话并发时保持原子。
//!
//! ## 行为契约（What）
//! - 每个频道保留最近 `offline_capacity` 条消息，超出时丢弃最旧的一条；
//! - `replay` 只写出 `mid` 严格大于水位的消息，按 `mid` 递增顺序，并记下回放时的存储游标；
//! - `register` 先补发游标之后入库、且 `mid` 大于水位的消息，再登记连接；它与
//!   [`MemoryChannel::publish`] 由频道级投递锁串行化，回放与登记之间发布的消息不会丢失，
//!   也不会重复投递；
//! - 登记以连接编号为键，只保存 [`WeakConnection`]；重复登记与注销未登记的连接都被拒绝；
//! - 每次投递受 `delivery_timeout` 约束，各连接并发写入；超时的连接被标记为放弃
//!   （[`ConnectionHandle::abandon`]），其会话在下一次写入时结束。
//!
//! ## 风险提示（Trade-offs）
//! - 同步锁只保护内存结构，从不跨越 `await`；投递锁是异步锁，持有时间以投递超时为上界；
//! - 超时被放弃的写入可能已写出半帧，因此该连接不再承载任何后续写入。

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::join_all;
use parking_lot::Mutex;
use relay_codec_resp::encode_bulk;
use tokio::{sync::Mutex as AsyncMutex, time};
use tracing::{debug, warn};

use crate::{
    Channel, ChannelError, ChannelRegistry, ConnectionHandle, ConnectionId, SharedChannel,
    WeakConnection,
};

/// 单次投递（回放、补发或实时推送一帧）的默认时限。
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// 一条离线消息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub mid: i64,
    pub payload: Bytes,
}

/// 有界离线存储；`seq` 按入库顺序单调递增，与客户端提供的 `mid` 无关。
#[derive(Debug)]
struct OfflineStore {
    entries: VecDeque<(u64, StoredMessage)>,
    last_seq: u64,
}

impl OfflineStore {
    fn push(&mut self, message: StoredMessage, capacity: usize) {
        self.last_seq += 1;
        self.entries.push_back((self.last_seq, message));
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }

    fn after_mid(&self, mid: i64) -> Vec<StoredMessage> {
        let mut pending: Vec<StoredMessage> = self
            .entries
            .iter()
            .filter(|(_, message)| message.mid > mid)
            .map(|(_, message)| message.clone())
            .collect();
        pending.sort_by_key(|message| message.mid);
        pending
    }

    fn stored_since(&self, seq: u64, mid: i64) -> Vec<StoredMessage> {
        self.entries
            .iter()
            .filter(|(stored_seq, message)| *stored_seq > seq && message.mid > mid)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[derive(Debug)]
struct Subscriber {
    conn: WeakConnection,
    mid: i64,
}

/// 回放完成、尚未登记的连接所看到的存储位置。
#[derive(Debug)]
struct ReplayCursor {
    conn: WeakConnection,
    seq: u64,
}

/// 单个 key 的内存频道。
#[derive(Debug)]
pub struct MemoryChannel {
    key: Arc<str>,
    capacity: usize,
    delivery_timeout: Duration,
    store: Mutex<OfflineStore>,
    tokens: Mutex<HashSet<String>>,
    subscribers: Mutex<HashMap<ConnectionId, Subscriber>>,
    cursors: Mutex<HashMap<ConnectionId, ReplayCursor>>,
    delivery: AsyncMutex<()>,
}

impl MemoryChannel {
    /// 创建空频道。
    pub fn new(key: &str, capacity: usize) -> Self {
        Self {
            key: Arc::from(key),
            capacity,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            store: Mutex::new(OfflineStore {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                last_seq: 0,
            }),
            tokens: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            delivery: AsyncMutex::new(()),
        }
    }

    /// 覆盖单次投递时限。
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 允许 `token` 订阅本频道。
    pub fn grant_token(&self, token: impl Into<String>) {
        self.tokens.lock().insert(token.into());
    }

    /// 撤销令牌。
    pub fn revoke_token(&self, token: &str) -> bool {
        self.tokens.lock().remove(token)
    }

    /// 当前登记的连接数（含尚未清理的失效引用）。
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// 离线消息快照。
    pub fn stored(&self) -> Vec<StoredMessage> {
        self.store
            .lock()
            .entries
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// 存入一条消息并并发推送给存活的登记连接，返回成功送达的连接数。
    pub async fn publish(&self, mid: i64, payload: Bytes) -> usize {
        let _delivery = self.delivery.lock().await;
        self.store.lock().push(
            StoredMessage {
                mid,
                payload: payload.clone(),
            },
            self.capacity,
        );

        let targets: Vec<ConnectionHandle> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|_, subscriber| subscriber.conn.upgrade().is_some());
            subscribers
                .values()
                .filter_map(|subscriber| subscriber.conn.upgrade())
                .filter(|conn| !conn.is_abandoned())
                .collect()
        };
        self.cursors
            .lock()
            .retain(|_, cursor| cursor.conn.upgrade().is_some());

        let frame = encode_bulk(&payload);
        let outcomes = join_all(targets.iter().map(|conn| self.deliver(conn, &frame))).await;

        let mut delivered = 0;
        for (conn, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(()) => delivered += 1,
                Err(err) => warn!(
                    key = %self.key,
                    conn = %conn.id(),
                    error = %err,
                    "live delivery failed"
                ),
            }
        }
        delivered
    }

    /// 在时限内写出一帧；超时则放弃该连接。
    async fn deliver(&self, conn: &ConnectionHandle, frame: &[u8]) -> io::Result<()> {
        match time::timeout(self.delivery_timeout, conn.write_all(frame)).await {
            Ok(result) => result,
            Err(_) => {
                conn.abandon();
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "delivery exceeded {:?}; connection abandoned",
                        self.delivery_timeout
                    ),
                ))
            }
        }
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn authenticate(&self, token: &str, key: &str) -> Result<(), ChannelError> {
        if self.tokens.lock().contains(token) {
            Ok(())
        } else {
            Err(ChannelError::AuthFailed {
                key: key.to_owned(),
            })
        }
    }

    async fn replay(
        &self,
        conn: &ConnectionHandle,
        mid: i64,
        key: &str,
    ) -> Result<(), ChannelError> {
        let (pending, seq) = {
            let store = self.store.lock();
            (store.after_mid(mid), store.last_seq)
        };
        debug!(key, mid, count = pending.len(), "replaying offline messages");
        for message in pending {
            self.deliver(conn, &encode_bulk(&message.payload)).await?;
        }
        self.cursors.lock().insert(
            conn.id(),
            ReplayCursor {
                conn: conn.downgrade(),
                seq,
            },
        );
        Ok(())
    }

    async fn register(
        &self,
        conn: &ConnectionHandle,
        mid: i64,
        key: &str,
    ) -> Result<(), ChannelError> {
        let _delivery = self.delivery.lock().await;
        let cursor = self.cursors.lock().remove(&conn.id());
        if self.subscribers.lock().contains_key(&conn.id()) {
            return Err(ChannelError::Rejected {
                key: key.to_owned(),
                detail: format!("{} is already registered", conn.id()),
            });
        }

        // 回放之后、登记之前入库的消息。
        if let Some(cursor) = cursor {
            let missed = self.store.lock().stored_since(cursor.seq, mid);
            if !missed.is_empty() {
                debug!(key, mid, count = missed.len(), "catching up before registration");
            }
            for message in missed {
                self.deliver(conn, &encode_bulk(&message.payload)).await?;
            }
        }

        self.subscribers.lock().insert(
            conn.id(),
            Subscriber {
                conn: conn.downgrade(),
                mid,
            },
        );
        Ok(())
    }

    async fn deregister(
        &self,
        conn: &ConnectionHandle,
        mid: i64,
        key: &str,
    ) -> Result<(), ChannelError> {
        self.cursors.lock().remove(&conn.id());
        let removed = self.subscribers.lock().remove(&conn.id());
        match removed {
            Some(subscriber) => {
                if subscriber.mid != mid {
                    // 水位不符仍视为注销成功。
                    debug!(
                        key,
                        registered = subscriber.mid,
                        requested = mid,
                        "watermark differs on deregister"
                    );
                }
                Ok(())
            }
            None => Err(ChannelError::Rejected {
                key: key.to_owned(),
                detail: format!("{} is not registered", conn.id()),
            }),
        }
    }
}

/// 基于 `DashMap` 的频道注册表。
#[derive(Debug)]
pub struct MemoryRegistry {
    channels: DashMap<Arc<str>, Arc<MemoryChannel>>,
    offline_capacity: usize,
    delivery_timeout: Duration,
}

impl MemoryRegistry {
    /// 创建空注册表，新频道保留 `offline_capacity` 条离线消息。
    pub fn new(offline_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            offline_capacity,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    /// 新建频道使用的单次投递时限。
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// 取得具体频道类型，用于发布与令牌管理。
    pub fn channel(&self, key: &str) -> Option<Arc<MemoryChannel>> {
        self.channels.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// 显式创建（或取回已存在的）频道。鉴权模式下频道只能经此路径产生。
    pub fn ensure_channel(&self, key: &str) -> Arc<MemoryChannel> {
        match self.channels.entry(Arc::from(key)) {
            Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            Entry::Vacant(vacant) => {
                let channel = Arc::new(
                    MemoryChannel::new(key, self.offline_capacity)
                        .with_delivery_timeout(self.delivery_timeout),
                );
                vacant.insert(Arc::clone(&channel));
                channel
            }
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl ChannelRegistry for MemoryRegistry {
    async fn get(&self, key: &str) -> Result<SharedChannel, ChannelError> {
        self.channel(key)
            .map(|channel| channel as SharedChannel)
            .ok_or_else(|| ChannelError::NotFound {
                key: key.to_owned(),
            })
    }

    async fn create(&self, key: &str) -> Result<SharedChannel, ChannelError> {
        if key.is_empty() {
            return Err(ChannelError::CreateFailed {
                key: key.to_owned(),
                detail: "channel key must not be empty".to_owned(),
            });
        }
        Ok(self.ensure_channel(key) as SharedChannel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_available(client: &mut tokio::io::DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).await.expect("read frame");
        buf
    }

    #[tokio::test]
    async fn get_misses_until_created() {
        let registry = MemoryRegistry::new(8);
        assert!(matches!(
            registry.get("k").await,
            Err(ChannelError::NotFound { .. })
        ));
        registry.create("k").await.expect("create");
        registry.get("k").await.expect("present after create");
        registry.create("k").await.expect("create is idempotent");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn replay_writes_only_messages_newer_than_watermark() {
        let registry = MemoryRegistry::new(8);
        let channel = registry.ensure_channel("k");
        channel.publish(4, Bytes::from_static(b"old")).await;
        channel.publish(6, Bytes::from_static(b"new")).await;

        let (mut client, server) = tokio::io::duplex(256);
        let conn = ConnectionHandle::new(None, server);
        channel.replay(&conn, 5, "k").await.expect("replay");
        assert_eq!(read_available(&mut client, 9).await, b"$3\r\nnew\r\n");
    }

    #[tokio::test]
    async fn offline_store_is_bounded() {
        let channel = MemoryChannel::new("k", 2);
        for mid in 1..=3 {
            channel.publish(mid, Bytes::from(mid.to_string())).await;
        }
        let mids: Vec<i64> = channel.stored().iter().map(|m| m.mid).collect();
        assert_eq!(mids, vec![2, 3]);
    }

    #[tokio::test]
    async fn registration_is_weak_and_exclusive() {
        let channel = MemoryChannel::new("k", 4);
        let (mut client, server) = tokio::io::duplex(256);
        let conn = ConnectionHandle::new(None, server);

        channel.register(&conn, 0, "k").await.expect("register");
        assert!(matches!(
            channel.register(&conn, 0, "k").await,
            Err(ChannelError::Rejected { .. })
        ));

        assert_eq!(channel.publish(1, Bytes::from_static(b"hi")).await, 1);
        assert_eq!(read_available(&mut client, 8).await, b"$2\r\nhi\r\n");

        channel.deregister(&conn, 0, "k").await.expect("deregister");
        assert!(channel.deregister(&conn, 0, "k").await.is_err());

        channel.register(&conn, 0, "k").await.expect("register again");
        drop(conn);
        assert_eq!(channel.publish(2, Bytes::from_static(b"x")).await, 0);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn message_published_between_replay_and_register_is_delivered_once() {
        let channel = MemoryChannel::new("k", 8);
        channel.publish(1, Bytes::from_static(b"a")).await;

        let (mut client, server) = tokio::io::duplex(256);
        let conn = ConnectionHandle::new(None, server);
        channel.replay(&conn, 0, "k").await.expect("replay");
        assert_eq!(channel.publish(2, Bytes::from_static(b"gap")).await, 0);
        channel.register(&conn, 0, "k").await.expect("register");
        assert_eq!(channel.publish(3, Bytes::from_static(b"live")).await, 1);

        conn.shutdown().await.expect("shutdown");
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.expect("read to eof");
        assert_eq!(received, b"$1\r\na\r\n$3\r\ngap\r\n$4\r\nlive\r\n");
    }

    #[tokio::test]
    async fn catch_up_respects_the_watermark() {
        let channel = MemoryChannel::new("k", 8);
        let (mut client, server) = tokio::io::duplex(256);
        let conn = ConnectionHandle::new(None, server);
        channel.replay(&conn, 5, "k").await.expect("replay");
        channel.publish(4, Bytes::from_static(b"old")).await;
        channel.publish(6, Bytes::from_static(b"new")).await;
        channel.register(&conn, 5, "k").await.expect("register");

        conn.shutdown().await.expect("shutdown");
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.expect("read to eof");
        assert_eq!(received, b"$3\r\nnew\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_does_not_hold_back_others() {
        let timeout = Duration::from_millis(100);
        let channel = MemoryChannel::new("k", 8).with_delivery_timeout(timeout);

        let (_stalled_client, stalled_server) = tokio::io::duplex(4);
        let stalled = ConnectionHandle::new(None, stalled_server);
        let (mut healthy_client, healthy_server) = tokio::io::duplex(256);
        let healthy = ConnectionHandle::new(None, healthy_server);
        channel.register(&stalled, 0, "k").await.expect("register stalled");
        channel.register(&healthy, 0, "k").await.expect("register healthy");

        assert_eq!(channel.publish(1, Bytes::from_static(b"payload")).await, 1);
        assert_eq!(
            read_available(&mut healthy_client, 13).await,
            b"$7\r\npayload\r\n"
        );
        assert!(stalled.is_abandoned());
        assert!(stalled.write_all(b"h").await.is_err());

        let started = time::Instant::now();
        assert_eq!(channel.publish(2, Bytes::from_static(b"x")).await, 1);
        assert!(started.elapsed() < timeout);
        assert_eq!(read_available(&mut healthy_client, 7).await, b"$1\r\nx\r\n");
    }

    #[tokio::test]
    async fn authenticate_checks_granted_tokens() {
        let channel = MemoryChannel::new("k", 4);
        assert!(matches!(
            channel.authenticate("tok", "k").await,
            Err(ChannelError::AuthFailed { .. })
        ));
        channel.grant_token("tok");
        channel.authenticate("tok", "k").await.expect("granted");
        assert!(channel.revoke_token("tok"));
        assert!(channel.authenticate("tok", "k").await.is_err());
    }
}
