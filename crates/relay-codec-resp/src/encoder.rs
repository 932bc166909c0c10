use bytes::{BufMut, Bytes, BytesMut};

use crate::{ARRAY_PREFIX, BULK_PREFIX, CRLF};

/// 将负载编码为 `$<len>\r\n<payload>\r\n`。服务端投递离线与实时消息时使用。
pub fn encode_bulk(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 16);
    put_bulk(&mut buf, payload);
    buf.freeze()
}

/// 将参数序列编码为完整命令帧，与 [`decode_command`](crate::decode_command) 对称。
pub fn encode_command<I, A>(args: I) -> Bytes
where
    I: IntoIterator<Item = A>,
    A: AsRef<[u8]>,
{
    let args: Vec<A> = args.into_iter().collect();
    let capacity = 16 + args.iter().map(|arg| arg.as_ref().len() + 16).sum::<usize>();
    let mut buf = BytesMut::with_capacity(capacity);
    put_header(&mut buf, ARRAY_PREFIX, args.len());
    for arg in &args {
        put_bulk(&mut buf, arg.as_ref());
    }
    buf.freeze()
}

fn put_bulk(buf: &mut BytesMut, payload: &[u8]) {
    put_header(buf, BULK_PREFIX, payload.len());
    buf.put_slice(payload);
    buf.put_slice(CRLF);
}

fn put_header(buf: &mut BytesMut, prefix: u8, size: usize) {
    buf.put_u8(prefix);
    buf.put_slice(size.to_string().as_bytes());
    buf.put_slice(CRLF);
}
