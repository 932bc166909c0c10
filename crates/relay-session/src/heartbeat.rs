//! 登记后的心跳监督循环。
//!
//! 每轮以 `interval` 为期限读取恰好 1 个字节：是探针则写回应答并进入下一轮，
//! 否则返回终止原因。期限在每轮重新计算，静默且永久阻塞的读取不可能出现。

use std::time::Duration;

use relay_core::ConnectionHandle;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    time,
};
use tracing::trace;

use crate::SessionError;

/// 心跳循环参数。
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat<'a> {
    pub interval: Duration,
    pub marker: u8,
    pub ack: &'a [u8],
}

impl Heartbeat<'_> {
    /// 运行循环直到失败；返回值即终止原因。
    pub async fn supervise<R>(&self, reader: &mut R, conn: &ConnectionHandle) -> SessionError
    where
        R: AsyncRead + Unpin,
    {
        let mut acknowledged: u64 = 0;
        loop {
            let byte = match time::timeout(self.interval, reader.read_u8()).await {
                Err(_elapsed) => {
                    return SessionError::HeartbeatTimeout {
                        interval: self.interval,
                    };
                }
                Ok(Err(err)) => return SessionError::ConnectionError(err),
                Ok(Ok(byte)) => byte,
            };

            if byte != self.marker {
                return SessionError::UnknownHeartbeatByte { byte };
            }

            if let Err(err) = conn.write_all(self.ack).await {
                return SessionError::HeartbeatWriteFailed(err);
            }
            acknowledged += 1;
            trace!(acknowledged, "heartbeat acknowledged");
        }
    }
}
