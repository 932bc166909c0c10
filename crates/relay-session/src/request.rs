use std::{fmt, str, time::Duration};

use bytes::Bytes;

use crate::SessionError;

/// `sub <key> <mid> [heartbeat_secs] [token]` 的解析结果。
///
/// # 教案式注释
/// - **契约 (What)**：
///   - `key`：非空 UTF-8 频道标识；
///   - `mid`：十进制 `i64` 水位；
///   - `heartbeat`：第 3 个参数给出的秒数（正整数），缺省时取策略默认值；
///   - `token`：第 4 个参数，缺省为空串；
///   - 第 4 个之后的多余参数被忽略。
/// - **风险 (Trade-offs)**：`Debug` 输出不包含令牌原文，只标注是否提供。
#[derive(Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub key: String,
    pub mid: i64,
    pub heartbeat: Duration,
    pub token: String,
}

impl SubscribeRequest {
    /// 必填参数个数（`key`、`mid`）。
    pub const REQUIRED_ARGS: usize = 2;

    /// 从命令名之后的参数解析订阅请求。
    pub fn parse(args: &[Bytes], default_heartbeat: Duration) -> Result<Self, SessionError> {
        if args.len() < Self::REQUIRED_ARGS {
            return Err(SessionError::bad_arguments(format!(
                "expected at least {} arguments, got {}",
                Self::REQUIRED_ARGS,
                args.len()
            )));
        }

        let key = utf8(&args[0], "key")?;
        if key.is_empty() {
            return Err(SessionError::bad_arguments("key must not be empty"));
        }

        let mid = utf8(&args[1], "mid")?
            .parse::<i64>()
            .map_err(|err| SessionError::bad_arguments(format!("mid is not an integer: {err}")))?;

        let heartbeat = match args.get(2) {
            None => default_heartbeat,
            Some(raw) => {
                let secs = utf8(raw, "heartbeat")?.parse::<u64>().map_err(|err| {
                    SessionError::bad_arguments(format!("heartbeat is not an integer: {err}"))
                })?;
                if secs == 0 {
                    return Err(SessionError::bad_arguments(
                        "heartbeat must be greater than zero",
                    ));
                }
                Duration::from_secs(secs)
            }
        };

        let token = match args.get(3) {
            None => String::new(),
            Some(raw) => utf8(raw, "token")?.to_owned(),
        };

        Ok(Self {
            key: key.to_owned(),
            mid,
            heartbeat,
            token,
        })
    }
}

impl fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("key", &self.key)
            .field("mid", &self.mid)
            .field("heartbeat", &self.heartbeat)
            .field("token_supplied", &!self.token.is_empty())
            .finish()
    }
}

fn utf8<'a>(raw: &'a Bytes, field: &str) -> Result<&'a str, SessionError> {
    str::from_utf8(raw).map_err(|_| SessionError::bad_arguments(format!("{field} is not UTF-8")))
}
