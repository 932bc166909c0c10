//! 会话测试共用的记录型注册表替身与内存连接。

#![allow(dead_code)]

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{Channel, ChannelError, ChannelRegistry, ConnectionHandle, SharedChannel};
use tokio::io::{AsyncWrite, BufReader, DuplexStream, ReadHalf};

/// 注册表与频道收到的调用，按发生顺序记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Get(String),
    Create(String),
    Authenticate { token: String, key: String },
    Replay { mid: i64, key: String },
    Register { mid: i64, key: String },
    Deregister { mid: i64, key: String },
}

/// 替身行为开关。
#[derive(Clone, Debug, Default)]
pub struct Behaviour {
    pub channel_exists: bool,
    pub reject_token: bool,
    pub fail_create: bool,
    pub fail_replay: bool,
    pub fail_register: bool,
}

#[derive(Clone)]
pub struct RecordingRegistry {
    calls: Arc<Mutex<Vec<Call>>>,
    behaviour: Behaviour,
    channel: Arc<RecordingChannel>,
}

impl RecordingRegistry {
    pub fn new(behaviour: Behaviour) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let channel = Arc::new(RecordingChannel {
            calls: Arc::clone(&calls),
            behaviour: behaviour.clone(),
        });
        Self {
            calls,
            behaviour,
            channel,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn deregistrations(&self) -> usize {
        self.count(|call| matches!(call, Call::Deregister { .. }))
    }
}

#[async_trait]
impl ChannelRegistry for RecordingRegistry {
    async fn get(&self, key: &str) -> Result<SharedChannel, ChannelError> {
        self.calls.lock().push(Call::Get(key.to_owned()));
        if self.behaviour.channel_exists {
            Ok(self.channel.clone() as SharedChannel)
        } else {
            Err(ChannelError::NotFound {
                key: key.to_owned(),
            })
        }
    }

    async fn create(&self, key: &str) -> Result<SharedChannel, ChannelError> {
        self.calls.lock().push(Call::Create(key.to_owned()));
        if self.behaviour.fail_create {
            Err(ChannelError::CreateFailed {
                key: key.to_owned(),
                detail: "refused by test".to_owned(),
            })
        } else {
            Ok(self.channel.clone() as SharedChannel)
        }
    }
}

pub struct RecordingChannel {
    calls: Arc<Mutex<Vec<Call>>>,
    behaviour: Behaviour,
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn authenticate(&self, token: &str, key: &str) -> Result<(), ChannelError> {
        self.calls.lock().push(Call::Authenticate {
            token: token.to_owned(),
            key: key.to_owned(),
        });
        if self.behaviour.reject_token {
            Err(ChannelError::AuthFailed {
                key: key.to_owned(),
            })
        } else {
            Ok(())
        }
    }

    async fn replay(
        &self,
        _conn: &ConnectionHandle,
        mid: i64,
        key: &str,
    ) -> Result<(), ChannelError> {
        self.calls.lock().push(Call::Replay {
            mid,
            key: key.to_owned(),
        });
        if self.behaviour.fail_replay {
            Err(ChannelError::Io(io::ErrorKind::BrokenPipe.into()))
        } else {
            Ok(())
        }
    }

    async fn register(
        &self,
        _conn: &ConnectionHandle,
        mid: i64,
        key: &str,
    ) -> Result<(), ChannelError> {
        self.calls.lock().push(Call::Register {
            mid,
            key: key.to_owned(),
        });
        if self.behaviour.fail_register {
            Err(ChannelError::Rejected {
                key: key.to_owned(),
                detail: "refused by test".to_owned(),
            })
        } else {
            Ok(())
        }
    }

    async fn deregister(
        &self,
        _conn: &ConnectionHandle,
        mid: i64,
        key: &str,
    ) -> Result<(), ChannelError> {
        self.calls.lock().push(Call::Deregister {
            mid,
            key: key.to_owned(),
        });
        Ok(())
    }
}

/// 服务端一侧的读半部与连接句柄，以及客户端一侧的流。
pub struct Pipe {
    pub client: DuplexStream,
    pub reader: BufReader<ReadHalf<DuplexStream>>,
    pub conn: ConnectionHandle,
}

pub fn pipe() -> Pipe {
    let (client, server) = tokio::io::duplex(1024);
    let (read_half, write_half) = tokio::io::split(server);
    Pipe {
        client,
        reader: BufReader::new(read_half),
        conn: ConnectionHandle::new(None, write_half),
    }
}

/// 每次写入都失败的写半部。
pub struct BrokenWriter;

impl AsyncWrite for BrokenWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// 组装 `*<n>\r\n$<len>\r\n<arg>\r\n...`。
pub fn frame(args: &[&str]) -> Vec<u8> {
    relay_codec_resp::encode_command(args.iter().map(|arg| arg.as_bytes())).to_vec()
}
