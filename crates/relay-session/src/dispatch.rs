use relay_core::{ChannelRegistry, Command, ConnectionHandle};
use tokio::io::AsyncRead;

use crate::{SessionError, SessionPolicy, SessionReport, SubscriptionSession};

/// 订阅命令名，大小写敏感。
pub const SUBSCRIBE: &[u8] = b"sub";

/// 按命令名把命令交给对应处理器。
///
/// # 教案式注释
/// - **契约 (What)**：
///   - `sub`：以其余参数运行 [`SubscriptionSession`]，返回会话结局；
///   - 其他命令名：返回 [`SessionError::UnknownCommand`]，不向连接写任何字节；
///   - 参数个数不足由会话在 `ParsingArgs` 阶段拒绝。
/// - **风险 (Trade-offs)**：新增命令只需在此增加分支，解码器不受影响。
pub async fn dispatch<R>(
    reader: &mut R,
    conn: &ConnectionHandle,
    command: &Command,
    registry: &dyn ChannelRegistry,
    policy: &SessionPolicy,
) -> Result<SessionReport, SessionError>
where
    R: AsyncRead + Unpin + Send,
{
    if command.name() == SUBSCRIBE {
        let session = SubscriptionSession::new(conn, registry, policy);
        return Ok(session.run(reader, command.args()).await);
    }

    Err(SessionError::UnknownCommand {
        name: String::from_utf8_lossy(command.name()).into_owned(),
    })
}
