#![no_main]

use arbitrary::Arbitrary;
use futures::executor::block_on;
use libfuzzer_sys::fuzz_target;
use relay_codec_resp::{DecodeLimits, LineTerminator, decode_command, encode_command};

/// Fuzz 用例：任意字节流，或由参数列表编码出的合法帧再施加截断/篡改。
///
/// - **Why**：纯随机字节很难越过长度行，结构化分支保证解码器的数据读取路径也被充分探索；
/// - **What**：`Raw` 直接解码；`Framed` 先编码再按 `cut` 截断、按 `flip` 改写一个字节。
#[derive(Debug, Arbitrary)]
enum DecodeCase {
    Raw {
        bytes: Vec<u8>,
        lf_only: bool,
    },
    Framed {
        args: Vec<Vec<u8>>,
        cut: Option<u16>,
        flip: Option<(u16, u8)>,
    },
}

fn limits(lf_only: bool) -> DecodeLimits {
    let terminator = if lf_only {
        LineTerminator::Lf
    } else {
        LineTerminator::Crlf
    };
    DecodeLimits::default().with_terminator(terminator)
}

/// 在同一输入上持续解码直到出错：只允许返回结果，不允许恐慌；成功时参数数量受上界约束。
fn decode_all(mut input: &[u8], limits: &DecodeLimits) {
    loop {
        match block_on(decode_command(&mut input, limits)) {
            Ok(command) => {
                assert!(!command.is_empty());
                assert!(command.len() <= limits.max_arguments);
            }
            Err(_) => break,
        }
    }
}

fuzz_target!(|case: DecodeCase| {
    match case {
        DecodeCase::Raw { bytes, lf_only } => decode_all(&bytes, &limits(lf_only)),
        DecodeCase::Framed { args, cut, flip } => {
            let mut bytes = encode_command(args.iter()).to_vec();
            let limits = limits(false);
            let intact = flip.is_none() && cut.map_or(true, |cut| usize::from(cut) >= bytes.len());
            let within_limits = !args.is_empty()
                && args.len() <= limits.max_arguments
                && args.iter().all(|arg| arg.len() <= limits.max_argument_bytes);

            if let Some((index, value)) = flip {
                if !bytes.is_empty() {
                    let index = usize::from(index) % bytes.len();
                    bytes[index] = value;
                }
            }
            if let Some(cut) = cut {
                bytes.truncate(usize::from(cut));
            }

            if intact && within_limits {
                let mut input = bytes.as_slice();
                let command = block_on(decode_command(&mut input, &limits))
                    .expect("well-formed frame must decode");
                let decoded = command.into_args();
                assert_eq!(decoded.len(), args.len());
                for (got, want) in decoded.iter().zip(&args) {
                    assert_eq!(&got[..], &want[..]);
                }
            }
            decode_all(&bytes, &limits);
        }
    }
});
