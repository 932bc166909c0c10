#![doc = r#"
# relay-codec-resp

## 设计动机（Why）
- **定位**：订阅中继在 TCP 连接上使用的命令分帧协议，取自一个广为人知的长度前缀文本
  协议的最小子集：`*<argc>\r\n` 后跟 `argc` 个 `$<len>\r\n<bytes>\r\n`。
- **架构角色**：位于依赖图的最底层，不依赖任何中继 crate；`relay-core` 复用其编码器
  写出离线/实时消息，`relay-session` 消费解码结果。

## 核心契约（What）
- [`decode_command`]：从带缓冲的字节流读取一条完整命令，要么返回 [`Command`]，
  要么返回 [`DecodeError`]；失败不会留下可供下一次调用复用的半帧状态。
- [`read_size_line`]/[`read_exact_data`]：解码的两个原语，分别读取长度行与定长数据。
- [`encode_bulk`]/[`encode_command`]：对称的写出工具，服务端投递与测试客户端共用。

## 实现策略（How）
- 基于 Tokio 的 `AsyncBufRead`/`AsyncRead`，每一次读取都有声明的上界
  （[`DecodeLimits`]），长度行在读取时即被截断检查。
- 行终止符策略由 [`LineTerminator`] 显式选择：默认要求 `\r\n`，`Lf` 模式仅要求 `\n`。

## 风险与考量（Trade-offs）
- 解码按命令整体进行，不支持在同一连接上流水线化多条命令之外的增量恢复；
  任何错误都视为对该连接致命。
"#]

mod command;
mod decoder;
mod encoder;
mod error;
mod limits;

pub use command::Command;
pub use decoder::{decode_command, read_exact_data, read_size_line};
pub use encoder::{encode_bulk, encode_command};
pub use error::DecodeError;
pub use limits::{DecodeLimits, LineTerminator};

/// 参数个数行的前缀字节。
pub const ARRAY_PREFIX: u8 = b'*';
/// 参数长度行的前缀字节。
pub const BULK_PREFIX: u8 = b'$';
/// 协议行终止符。
pub const CRLF: &[u8; 2] = b"\r\n";
