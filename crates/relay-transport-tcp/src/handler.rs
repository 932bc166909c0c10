use std::{any::Any, fmt, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use relay_codec_resp::{DecodeError, DecodeLimits, decode_command};
use relay_core::{ChannelRegistry, ConfigError, ConnectionHandle, RelayConfig};
use relay_session::{SessionPolicy, dispatch};
use tokio::{
    io::{AsyncBufRead, BufReader},
    net::TcpStream,
};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::SocketOptions;

/// 所有连接任务共享的只读上下文。
///
/// - `registry`：频道注册表协作方；
/// - `policy`：会话策略（鉴权开关、默认心跳、心跳字节）；
/// - `limits`：帧解码上界；
/// - `options`：接入时设置的套接字选项。
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<dyn ChannelRegistry>,
    pub policy: SessionPolicy,
    pub limits: DecodeLimits,
    pub options: SocketOptions,
}

impl ConnectionContext {
    pub fn new(registry: Arc<dyn ChannelRegistry>) -> Self {
        Self {
            registry,
            policy: SessionPolicy::default(),
            limits: DecodeLimits::default(),
            options: SocketOptions::default(),
        }
    }

    /// 从进程配置投影全部参数。
    pub fn from_config(
        config: &RelayConfig,
        registry: Arc<dyn ChannelRegistry>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            registry,
            policy: SessionPolicy::from_config(config)?,
            limits: config.decode_limits(),
            options: SocketOptions::from_config(config),
        })
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("policy", &self.policy)
            .field("limits", &self.limits)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// 单条连接的完整生命周期：解码 → 分发 → 会话 → 关闭。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 每个连接独立调度，一个连接上的阻塞或失败不影响接入循环和其他连接；
///
/// ## 逻辑 (How)
/// - `into_split` 拆分读写：读半部加缓冲后由本任务独占，写半部装入 [`ConnectionHandle`]
///   供会话与频道共享；
/// - 处理过程包在 `catch_unwind` 中，恐慌被记录为错误而不是终止进程；
/// - 无论结果如何，最后关闭写方向一次，随后两个半部一并释放，连接关闭。
///
/// ## 契约 (What)
/// - 不向客户端写回任何诊断；所有细节只进入 `relay.conn` span 下的日志。
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<ConnectionContext>,
) {
    let (read_half, write_half) = stream.into_split();
    let conn = ConnectionHandle::new(Some(peer), write_half);
    let span = info_span!("relay.conn", peer = %peer, conn_id = conn.id().get());

    async move {
        let mut reader = BufReader::new(read_half);
        let handled = AssertUnwindSafe(serve_connection(&mut reader, &conn, &context))
            .catch_unwind()
            .await;
        if let Err(payload) = handled {
            error!(panic = %panic_message(payload.as_ref()), "connection handler panicked");
        }

        if let Err(err) = conn.shutdown().await {
            debug!(error = %err, "connection shutdown reported an error");
        }
        debug!("connection closed");
    }
    .instrument(span)
    .await
}

async fn serve_connection<R>(reader: &mut R, conn: &ConnectionHandle, context: &ConnectionContext)
where
    R: AsyncBufRead + Unpin + Send,
{
    let command = match decode_command(reader, &context.limits).await {
        Ok(command) => command,
        Err(DecodeError::ConnectionClosed) => {
            debug!("peer closed before sending a command");
            return;
        }
        Err(err) => {
            warn!(code = err.code(), error = %err, "failed to decode command");
            return;
        }
    };

    match dispatch(reader, conn, &command, context.registry.as_ref(), &context.policy).await {
        Ok(report) => debug!(
            state = ?report.state_reached,
            deregistered = report.deregistered,
            "session finished"
        ),
        Err(err) => warn!(code = err.code(), error = %err, "command rejected"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
