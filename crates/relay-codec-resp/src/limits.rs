/// 长度行的终止符策略。
///
/// # 教案式注释
/// - **意图 (Why)**：协议名义上以 `\r\n` 结束每一行；部分历史客户端只发送 `\n`。
///   两种行为以具名选项暴露，由部署方显式选择。
/// - **契约 (What)**：
///   - `Crlf`：长度行在 `\n` 处结束，且倒数第二个字节必须是 `\r`；数据尾部必须为 `\r\n`；
///   - `Lf`：长度行在 `\n` 处结束，前置的 `\r` 可有可无并被剥离；数据尾部只校验第二个字节为 `\n`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LineTerminator {
    /// 严格的 `\r\n` 终止。
    #[default]
    Crlf,
    /// 仅以 `\n` 终止。
    Lf,
}

/// 单条命令解码时的读取上界。
///
/// - **契约 (What)**：声明的参数个数不得超过 `max_arguments`；单个参数声明长度不得超过
///   `max_argument_bytes`；长度行（不含终止符）不得超过 `max_header_bytes`。
///   超限统一返回 [`DecodeError::FrameTooLarge`](crate::DecodeError::FrameTooLarge)。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_arguments: usize,
    pub max_argument_bytes: usize,
    pub max_header_bytes: usize,
    pub terminator: LineTerminator,
}

impl DecodeLimits {
    pub const DEFAULT_MAX_ARGUMENTS: usize = 16;
    pub const DEFAULT_MAX_ARGUMENT_BYTES: usize = 64 * 1024;
    pub const DEFAULT_MAX_HEADER_BYTES: usize = 32;

    /// 覆盖终止符策略。
    pub fn with_terminator(mut self, terminator: LineTerminator) -> Self {
        self.terminator = terminator;
        self
    }
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_arguments: Self::DEFAULT_MAX_ARGUMENTS,
            max_argument_bytes: Self::DEFAULT_MAX_ARGUMENT_BYTES,
            max_header_bytes: Self::DEFAULT_MAX_HEADER_BYTES,
            terminator: LineTerminator::Crlf,
        }
    }
}
