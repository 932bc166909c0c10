use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};

use crate::{
    ARRAY_PREFIX, BULK_PREFIX, CRLF, Command, DecodeError, DecodeLimits, LineTerminator,
};

/// 读取一行长度声明并解析为非负十进制整数。
///
/// # 教案式注释
///
/// ## 契约 (What)
/// - 行首字节必须等于 `prefix`（`*` 表示参数个数，`$` 表示参数长度）；
/// - 去掉终止符后，剩余部分必须是至少一位的 ASCII 十进制数字；
/// - 终止符按 `limits.terminator` 校验，参见 [`LineTerminator`]；
/// - 读取量上界为 `max_header_bytes + 2`，超出即返回 `FrameTooLarge`。
///
/// ## 错误语义
/// - 一个字节都未读到：[`DecodeError::ConnectionClosed`]；
/// - 行读到一半流结束：[`DecodeError::TruncatedFrame`]，`expected` 为“至少再多一个字节”；
/// - 前缀、长度或数字不合法：[`DecodeError::MalformedHeader`]；
/// - 底层读取失败：[`DecodeError::Io`]。
pub async fn read_size_line<R>(
    reader: &mut R,
    prefix: u8,
    limits: &DecodeLimits,
) -> Result<usize, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let budget = limits.max_header_bytes + CRLF.len();
    let mut line = Vec::with_capacity(16);
    let read = (&mut *reader)
        .take(budget as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Err(DecodeError::ConnectionClosed);
    }

    if line.last() != Some(&b'\n') {
        if line.len() >= budget {
            return Err(DecodeError::FrameTooLarge {
                what: "header line length",
                declared: line.len(),
                limit: limits.max_header_bytes,
            });
        }
        return Err(DecodeError::TruncatedFrame {
            unit: "header bytes",
            expected: line.len() + 1,
            received: line.len(),
        });
    }

    let content = match limits.terminator {
        LineTerminator::Crlf => {
            if line.len() < CRLF.len() || line[line.len() - 2] != b'\r' {
                return Err(DecodeError::malformed(
                    prefix,
                    &line,
                    "line is not terminated by CRLF",
                ));
            }
            &line[..line.len() - CRLF.len()]
        }
        LineTerminator::Lf => {
            let body = &line[..line.len() - 1];
            body.strip_suffix(b"\r").unwrap_or(body)
        }
    };

    parse_size(prefix, content)
}

/// 读取恰好 `len` 个数据字节及其后的 2 字节终止符。
///
/// - **契约 (What)**：共消费 `len + 2` 字节；短读会继续读取直至读满，流提前结束则返回
///   [`DecodeError::TruncatedFrame`]；尾部不是终止符说明实际长度与声明不符，返回
///   [`DecodeError::DecodeSizeMismatch`]。
/// - **后置条件**：返回的 [`Bytes`] 长度恰为 `len`，不含终止符。
pub async fn read_exact_data<R>(
    reader: &mut R,
    len: usize,
    terminator: LineTerminator,
) -> Result<Bytes, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let expected = len
        .checked_add(CRLF.len())
        .ok_or(DecodeError::FrameTooLarge {
            what: "argument length",
            declared: len,
            limit: usize::MAX - CRLF.len(),
        })?;
    let mut buf = BytesMut::zeroed(expected);
    let mut filled = 0;
    while filled < expected {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(DecodeError::TruncatedFrame {
                unit: "argument bytes",
                expected,
                received: filled,
            });
        }
        filled += n;
    }

    let trailer_ok = match terminator {
        LineTerminator::Crlf => &buf[len..] == CRLF,
        LineTerminator::Lf => buf[len + 1] == b'\n',
    };
    if !trailer_ok {
        return Err(DecodeError::DecodeSizeMismatch { declared: len });
    }

    buf.truncate(len);
    Ok(buf.freeze())
}

/// 从字节流解码一条完整命令。
///
/// # 教案式注释
///
/// ## 逻辑 (How)
/// 1. 以 `*` 前缀读取参数个数 `n`，`n < 1` 返回 `EmptyCommand`，超过上限返回 `FrameTooLarge`；
/// 2. 依次读取 `n` 个参数：`$` 长度行 + 定长数据，按到达顺序追加；
/// 3. 命令开始之后流若结束，统一报告为 `TruncatedFrame`，以区别于“从未发送命令”的
///    `ConnectionClosed`。
///
/// ## 契约 (What)
/// - 函数本身不持有跨调用状态；失败时已读取的字节被丢弃，调用方应关闭连接。
pub async fn decode_command<R>(reader: &mut R, limits: &DecodeLimits) -> Result<Command, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let count = read_size_line(reader, ARRAY_PREFIX, limits).await?;
    if count < 1 {
        return Err(DecodeError::EmptyCommand);
    }
    if count > limits.max_arguments {
        return Err(DecodeError::FrameTooLarge {
            what: "argument count",
            declared: count,
            limit: limits.max_arguments,
        });
    }

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len = match read_size_line(reader, BULK_PREFIX, limits).await {
            Ok(len) => len,
            Err(DecodeError::ConnectionClosed) => {
                return Err(DecodeError::TruncatedFrame {
                    unit: "arguments",
                    expected: count,
                    received: args.len(),
                });
            }
            Err(err) => return Err(err),
        };
        if len > limits.max_argument_bytes {
            return Err(DecodeError::FrameTooLarge {
                what: "argument length",
                declared: len,
                limit: limits.max_argument_bytes,
            });
        }
        args.push(read_exact_data(reader, len, limits.terminator).await?);
    }

    Command::from_args(args).ok_or(DecodeError::EmptyCommand)
}

fn parse_size(prefix: u8, content: &[u8]) -> Result<usize, DecodeError> {
    let Some((&first, digits)) = content.split_first() else {
        return Err(DecodeError::malformed(prefix, content, "empty header line"));
    };
    if first != prefix {
        return Err(DecodeError::malformed(
            prefix,
            content,
            "unexpected prefix byte",
        ));
    }
    if digits.is_empty() {
        return Err(DecodeError::malformed(prefix, content, "missing size digits"));
    }
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(DecodeError::malformed(
            prefix,
            content,
            "size is not a base-10 integer",
        ));
    }

    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or_else(|| DecodeError::malformed(prefix, content, "size overflows usize"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DecodeLimits {
        DecodeLimits::default()
    }

    async fn decode(input: &[u8]) -> Result<Command, DecodeError> {
        let mut reader = input;
        decode_command(&mut reader, &limits()).await
    }

    #[tokio::test]
    async fn decodes_subscribe_command_in_arrival_order() {
        let command = decode(b"*3\r\n$3\r\nsub\r\n$1\r\nk\r\n$1\r\n5\r\n")
            .await
            .expect("valid frame");
        assert_eq!(command.name(), b"sub");
        assert_eq!(command.args()[0].as_ref(), b"k");
        assert_eq!(command.args()[1].as_ref(), b"5");
    }

    #[tokio::test]
    async fn zero_length_argument_is_accepted() {
        let command = decode(b"*2\r\n$3\r\nsub\r\n$0\r\n\r\n")
            .await
            .expect("empty bulk string");
        assert_eq!(command.args()[0].len(), 0);
    }

    #[tokio::test]
    async fn argument_bytes_may_contain_crlf() {
        let command = decode(b"*1\r\n$4\r\na\r\nb\r\n").await.expect("binary safe");
        assert_eq!(command.name(), b"a\r\nb");
    }

    #[tokio::test]
    async fn zero_count_is_empty_command() {
        let err = decode(b"*0\r\n").await.expect_err("argc < 1");
        assert!(matches!(err, DecodeError::EmptyCommand));
    }

    #[tokio::test]
    async fn wrong_prefix_is_malformed() {
        let err = decode(b"$1\r\n$1\r\na\r\n").await.expect_err("wrong prefix");
        assert_eq!(err.code(), "relay.decode.malformed_header");
    }

    #[tokio::test]
    async fn negative_or_non_numeric_sizes_are_malformed() {
        let inputs: [&[u8]; 4] = [b"*-1\r\n", b"*x\r\n", b"*\r\n", b"*1 \r\n"];
        for input in inputs {
            let err = decode(input).await.expect_err("malformed size");
            assert!(
                matches!(err, DecodeError::MalformedHeader { .. }),
                "unexpected error for {input:?}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn crlf_policy_rejects_bare_line_feed() {
        let err = decode(b"*1\n$1\na\r\n").await.expect_err("LF only");
        assert!(matches!(err, DecodeError::MalformedHeader { .. }));
    }

    #[tokio::test]
    async fn lf_policy_accepts_bare_line_feed_and_crlf() {
        let limits = limits().with_terminator(LineTerminator::Lf);
        let mut reader: &[u8] = b"*2\n$3\r\nsub\r\n$1\nk\r\n";
        let command = decode_command(&mut reader, &limits).await.expect("LF policy");
        assert_eq!(command.name(), b"sub");
        assert_eq!(command.args()[0].as_ref(), b"k");
    }

    #[tokio::test]
    async fn short_data_is_truncated() {
        let err = decode(b"*1\r\n$5\r\nab").await.expect_err("truncated");
        match err {
            DecodeError::TruncatedFrame {
                expected, received, ..
            } => {
                assert_eq!(expected, 7);
                assert_eq!(received, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_arguments_are_truncated() {
        let err = decode(b"*2\r\n$3\r\nsub\r\n").await.expect_err("second arg missing");
        assert!(matches!(
            err,
            DecodeError::TruncatedFrame {
                unit: "arguments",
                expected: 2,
                received: 1
            }
        ));
    }

    #[tokio::test]
    async fn longer_data_than_declared_is_size_mismatch() {
        let err = decode(b"*1\r\n$2\r\nabc\r\n").await.expect_err("mismatch");
        assert!(matches!(err, DecodeError::DecodeSizeMismatch { declared: 2 }));
    }

    #[tokio::test]
    async fn empty_stream_is_connection_closed() {
        let err = decode(b"").await.expect_err("no bytes");
        assert!(matches!(err, DecodeError::ConnectionClosed));
    }

    #[tokio::test]
    async fn declared_sizes_are_bounded() {
        let limits = DecodeLimits {
            max_arguments: 2,
            max_argument_bytes: 4,
            ..DecodeLimits::default()
        };
        let mut too_many: &[u8] = b"*3\r\n";
        let err = decode_command(&mut too_many, &limits).await.expect_err("argc");
        assert!(matches!(err, DecodeError::FrameTooLarge { what: "argument count", .. }));

        let mut too_long: &[u8] = b"*1\r\n$5\r\nhello\r\n";
        let err = decode_command(&mut too_long, &limits).await.expect_err("len");
        assert!(matches!(err, DecodeError::FrameTooLarge { what: "argument length", .. }));
    }

    #[tokio::test]
    async fn unterminated_header_longer_than_budget_is_rejected() {
        let mut input: &[u8] = b"*1111111111111111111111111111111111111111111111\r\n";
        let err = decode_command(&mut input, &limits()).await.expect_err("long header");
        assert!(matches!(err, DecodeError::FrameTooLarge { what: "header line length", .. }));
    }

    #[tokio::test]
    async fn read_exact_data_keeps_reading_after_short_reads() {
        let (mut client, server) = tokio::io::duplex(1);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"hello\r\n").await.expect("write");
        });
        let mut reader = server;
        let data = read_exact_data(&mut reader, 5, LineTerminator::Crlf)
            .await
            .expect("assembled from 1-byte reads");
        assert_eq!(data.as_ref(), b"hello");
        writer.await.expect("writer task");
    }
}
