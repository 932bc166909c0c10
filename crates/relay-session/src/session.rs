use bytes::Bytes;
use relay_core::{ChannelError, ChannelRegistry, ConnectionHandle, SharedChannel};
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

use crate::{
    Heartbeat, RegistrationGuard, SessionError, SessionPhase, SessionPolicy, SessionState,
    SubscribeRequest,
};

/// 一次订阅会话的结局。
///
/// - `state_reached`：终止前到达的最后一个状态；
/// - `error`：终止原因，会话总是以失败或对端关闭结束，因此正常情况下必有值；
/// - `deregistered`：频道是否接受了注销（仅在到达登记后才可能为 `true`）。
#[derive(Debug)]
pub struct SessionReport {
    pub state_reached: SessionState,
    pub error: Option<SessionError>,
    pub deregistered: bool,
}

/// 单条连接上的订阅会话状态机。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 在一条连接上严格串行完成解析、绑定、鉴权、回放与登记，确保频道在回放完成之前
///   观察不到登记，避免同一消息经回放与实时推送各投递一次；
/// - 登记后的所有退出路径共享同一个注销点，由 [`RegistrationGuard`] 保证至多一次。
///
/// ## 逻辑 (How)
/// 1. [`SubscribeRequest::parse`] 校验参数，心跳缺省取策略值；
/// 2. 查找频道；未命中时，关闭鉴权则创建，开启鉴权则失败；
/// 3. 鉴权模式下以 `(token, key)` 校验；
/// 4. 以 `mid` 请求回放，频道直接写入连接；
/// 5. 登记连接并立即建立注销守卫；
/// 6. 进入 [`Heartbeat::supervise`]，返回即释放守卫。
///
/// ## 契约 (What)
/// - 会话不向客户端写回任何错误帧；读半部由调用方传入，写半部经 `conn` 共享；
/// - 会话不关闭连接，关闭由接入层负责。
pub struct SubscriptionSession<'a> {
    conn: &'a ConnectionHandle,
    registry: &'a dyn ChannelRegistry,
    policy: &'a SessionPolicy,
    state: SessionState,
}

impl<'a> SubscriptionSession<'a> {
    pub fn new(
        conn: &'a ConnectionHandle,
        registry: &'a dyn ChannelRegistry,
        policy: &'a SessionPolicy,
    ) -> Self {
        Self {
            conn,
            registry,
            policy,
            state: SessionState::ParsingArgs,
        }
    }

    /// 以 `sub` 之后的参数运行会话直到终止。
    pub async fn run<R>(mut self, reader: &mut R, args: &[Bytes]) -> SessionReport
    where
        R: AsyncRead + Unpin + Send,
    {
        let request = match SubscribeRequest::parse(args, self.policy.default_heartbeat) {
            Ok(request) => request,
            Err(err) => return self.terminate(err, false),
        };

        let guard = match self.establish(&request).await {
            Ok(guard) => guard,
            Err(err) => return self.terminate(err, false),
        };

        self.advance(SessionState::HeartbeatLoop);
        info!(
            key = %request.key,
            mid = request.mid,
            heartbeat_secs = request.heartbeat.as_secs(),
            token_supplied = !request.token.is_empty(),
            "subscription registered"
        );

        let heartbeat = Heartbeat {
            interval: request.heartbeat,
            marker: self.policy.heartbeat_marker,
            ack: &self.policy.heartbeat_ack,
        };
        let err = heartbeat.supervise(reader, self.conn).await;
        let deregistered = guard.release().await;
        self.terminate(err, deregistered)
    }

    async fn establish(
        &mut self,
        request: &SubscribeRequest,
    ) -> Result<RegistrationGuard, SessionError> {
        let key = request.key.as_str();

        let channel = self.resolve(key).await?;
        self.advance(SessionState::Resolved);

        if self.policy.auth_required {
            channel
                .authenticate(&request.token, key)
                .await
                .map_err(|source| SessionError::AuthFailed {
                    key: key.to_owned(),
                    source,
                })?;
            self.advance(SessionState::Authenticated);
        }

        channel
            .replay(self.conn, request.mid, key)
            .await
            .map_err(|source| SessionError::ReplayFailed {
                key: key.to_owned(),
                source,
            })?;
        self.advance(SessionState::Replayed);

        channel
            .register(self.conn, request.mid, key)
            .await
            .map_err(|source| SessionError::RegisterFailed {
                key: key.to_owned(),
                source,
            })?;
        let guard =
            RegistrationGuard::new(channel, self.conn.clone(), request.mid, key.to_owned());
        self.advance(SessionState::Registered);
        Ok(guard)
    }

    async fn resolve(&self, key: &str) -> Result<SharedChannel, SessionError> {
        match self.registry.get(key).await {
            Ok(channel) => Ok(channel),
            Err(ChannelError::NotFound { .. }) if !self.policy.auth_required => {
                debug!(key, "channel absent; creating");
                self.registry
                    .create(key)
                    .await
                    .map_err(|source| SessionError::ChannelCreateFailed {
                        key: key.to_owned(),
                        source,
                    })
            }
            Err(ChannelError::NotFound { .. }) => Err(SessionError::ChannelNotFound {
                key: key.to_owned(),
            }),
            Err(other) => {
                warn!(key, code = other.code(), error = %other, "channel lookup failed");
                Err(SessionError::ChannelNotFound {
                    key: key.to_owned(),
                })
            }
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {:?} -> {next:?}",
            self.state
        );
        self.state = next;
    }

    fn terminate(&mut self, err: SessionError, deregistered: bool) -> SessionReport {
        let state_reached = self.state;
        debug_assert!(!state_reached.is_terminal(), "session terminated twice");
        debug_assert_eq!(
            state_reached.owes_deregistration(),
            err.phase() == SessionPhase::Registered,
            "failure phase disagrees with state {state_reached:?}"
        );
        self.advance(SessionState::Terminated);

        match err.phase() {
            SessionPhase::Setup => warn!(
                code = err.code(),
                error = %err,
                state = ?state_reached,
                "subscription rejected"
            ),
            SessionPhase::Registered => info!(
                code = err.code(),
                error = %err,
                deregistered,
                "subscription ended"
            ),
        }

        SessionReport {
            state_reached,
            error: Some(err),
            deregistered,
        }
    }
}
