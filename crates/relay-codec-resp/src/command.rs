use bytes::Bytes;

/// 解码得到的一条命令：有序的字节串参数序列，第 0 个参数为命令名。
///
/// # 教案式注释
/// - **契约 (What)**：`args.len() >= 1` 恒成立；每个参数的字节长度与其长度前缀严格相等，
///   由解码器在构造前保证。
/// - **逻辑 (How)**：参数以 [`Bytes`] 保存，切片共享底层缓冲，按值传递给分发器时无需复制。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// 由参数列表构造命令；列表为空时返回 `None`。
    pub fn from_args(args: Vec<Bytes>) -> Option<Self> {
        if args.is_empty() {
            None
        } else {
            Some(Self { args })
        }
    }

    /// 命令名（第 0 个参数），大小写敏感。
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// 命令名之后的参数。
    pub fn args(&self) -> &[Bytes] {
        &self.args[1..]
    }

    /// 参数总数，包含命令名。
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// 恒为 `false`，保留以满足 `len` 的惯用配对。
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// 取回全部参数（含命令名）。
    pub fn into_args(self) -> Vec<Bytes> {
        self.args
    }
}
