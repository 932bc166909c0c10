use std::fmt;

use relay_core::{ConnectionHandle, SharedChannel};
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// 登记成功后持有的注销义务。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 登记之后的每一条退出路径（心跳超时、未知字节、写失败、对端关闭、任务被取消或恐慌展开）
///   都必须注销且只注销一次；把义务放进一个值里，由所有权保证这一点，而不是在每个失败点重复清理。
///
/// ## 逻辑 (How)
/// - 正常路径调用 [`release`](Self::release)，在当前任务内等待注销完成；
/// - 若守卫在释放前被丢弃，`Drop` 将注销投递到当前 Tokio 运行时后台执行；
/// - 内部以 `Option` 记录义务，取走即消费，两条路径互斥。
///
/// ## 契约 (What)
/// - 注销失败只记录日志，不向上传播；
/// - 不在 Tokio 运行时上下文中丢弃时无法投递注销，只能记录告警。
pub struct RegistrationGuard {
    registration: Option<Registration>,
}

struct Registration {
    channel: SharedChannel,
    conn: ConnectionHandle,
    mid: i64,
    key: String,
}

impl Registration {
    async fn deregister(self) -> bool {
        match self.channel.deregister(&self.conn, self.mid, &self.key).await {
            Ok(()) => {
                debug!(
                    key = %self.key,
                    mid = self.mid,
                    conn = %self.conn.id(),
                    "connection deregistered"
                );
                true
            }
            Err(err) => {
                warn!(
                    key = %self.key,
                    mid = self.mid,
                    conn = %self.conn.id(),
                    code = err.code(),
                    error = %err,
                    "deregistration failed"
                );
                false
            }
        }
    }
}

impl fmt::Debug for RegistrationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("RegistrationGuard");
        if let Some(registration) = &self.registration {
            debug
                .field("key", &registration.key)
                .field("mid", &registration.mid)
                .field("conn", &registration.conn.id());
        }
        debug.field("armed", &self.registration.is_some()).finish()
    }
}

impl RegistrationGuard {
    /// 为一次已成功的登记建立注销义务。
    pub fn new(channel: SharedChannel, conn: ConnectionHandle, mid: i64, key: String) -> Self {
        Self {
            registration: Some(Registration {
                channel,
                conn,
                mid,
                key,
            }),
        }
    }

    /// 执行注销并消费守卫；返回频道是否接受了注销。
    pub async fn release(mut self) -> bool {
        match self.registration.take() {
            Some(registration) => registration.deregister().await,
            None => false,
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                debug!(key = %registration.key, "scheduling deregistration for abandoned session");
                handle.spawn(registration.deregister());
            }
            Err(_) => warn!(
                key = %registration.key,
                conn = %registration.conn.id(),
                "no runtime available; deregistration skipped"
            ),
        }
    }
}
