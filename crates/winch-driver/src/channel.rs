//! 命令通道
//!
//! 一次逻辑交换 = 写出命令文本 + 读回全部期望响应行，整体在
//! 同一把锁内完成。不同线程的交换因此严格串行，命令/响应的
//! 配对顺序就是锁的获得顺序。
//!
//! 行读取逐字节进行，直到 CR/LF、流结束或读超时；超时与流结束
//! 都表现为空响应行，而不是挂起。

use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use winch_protocol::{expected_responses, normalize_terminators};
use winch_serial::{Transport, TransportError};

/// 通道错误
#[derive(Error, Debug)]
pub enum ChannelError {
    /// 底层传输错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// 串行命令通道
///
/// 对 [`Transport`] 的独占封装。所有设备 I/O 都必须经过这里，
/// 这把锁也是会话级命令顺序保证的唯一来源。
pub struct CommandChannel {
    io: Mutex<Box<dyn Transport>>,
}

impl CommandChannel {
    /// 接管一个传输
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            io: Mutex::new(Box::new(transport)),
        }
    }

    /// 设置行读取的超时上限
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<(), ChannelError> {
        self.io.lock().set_read_timeout(timeout)?;
        Ok(())
    }

    /// 发送命令并读回响应，响应数量从文本推断
    ///
    /// 文本先做行结束符规范化；既不以空格也不以 CR 结尾的命令
    /// 会被补上 CR（并记一条警告，这通常是调用方笔误）。
    pub fn exchange(&self, text: &str) -> Result<Vec<String>, ChannelError> {
        let mut out = normalize_terminators(text);
        if !out.ends_with(' ') && !out.ends_with('\r') {
            warn!("command {:?} ends in neither space nor CR, assuming CR", text);
            out.push('\r');
        }
        let expected = expected_responses(&out);
        self.exchange_prepared(&out, expected)
    }

    /// 发送命令并读回显式数量的响应
    ///
    /// `PRINT(...,#13,...)` 的响应数量无法从 CR 计数推断，
    /// 调用方必须显式给出。
    pub fn exchange_n(&self, text: &str, expected: usize) -> Result<Vec<String>, ChannelError> {
        let out = normalize_terminators(text);
        self.exchange_prepared(&out, expected)
    }

    fn exchange_prepared(&self, out: &str, expected: usize) -> Result<Vec<String>, ChannelError> {
        // 写与读必须在同一临界区内：别的线程不能在两者之间插入命令
        let mut io = self.io.lock();
        io.write_all(out.as_bytes())?;
        let mut responses = Vec::with_capacity(expected);
        for _ in 0..expected {
            responses.push(read_line(io.as_mut())?);
        }
        Ok(responses)
    }
}

/// 逐字节读一行
///
/// CR、LF 或"无数据"（超时/流结束）都结束当前行。部分固件/串口
/// 库不支持自定义行结束符的缓冲读取，逐字节是最低公分母，也让
/// 超时语义保持简单。
fn read_line(io: &mut dyn Transport) -> Result<String, ChannelError> {
    let mut bytes = Vec::new();
    loop {
        match io.read_byte()? {
            Some(b'\r') | Some(b'\n') => break,
            Some(byte) => bytes.push(byte),
            None => {
                if bytes.is_empty() {
                    debug!("read_line: no data before timeout, returning empty response");
                }
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use winch_serial::SimMotor;

    /// 永远静默的传输：写成功，读永远没有数据
    struct DeadTransport;

    impl Transport for DeadTransport {
        fn write_all(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
            Ok(None)
        }
        fn set_read_timeout(&mut self, _timeout: Duration) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn test_exchange_single_response() {
        let channel = CommandChannel::new(SimMotor::new());
        let lines = channel.exchange("RSP\r").unwrap();
        assert_eq!(lines, vec!["8000/5.0.3.61"]);
    }

    #[test]
    fn test_exchange_no_response_command() {
        let channel = CommandChannel::new(SimMotor::new());
        let lines = channel.exchange("ECHO_OFF ").unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn test_exchange_normalizes_newlines() {
        let channel = CommandChannel::new(SimMotor::new());
        let lines = channel.exchange("RPA\nRCLK\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "0");
    }

    #[test]
    fn test_exchange_appends_missing_terminator() {
        let channel = CommandChannel::new(SimMotor::new());
        // 结尾缺分隔符：按 CR 处理，产生一行响应
        let lines = channel.exchange("RPA").unwrap();
        assert_eq!(lines, vec!["0"]);
    }

    #[test]
    fn test_exchange_n_print_query() {
        let channel = CommandChannel::new(SimMotor::new());
        let lines = channel.exchange_n("PRINT(VA,#13,UIA,#13) ", 2).unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_silent_device_yields_empty_lines() {
        let channel = CommandChannel::new(DeadTransport);
        // 设备不响应：读到的是空行，而不是挂起
        let lines = channel.exchange("RSP\r").unwrap();
        assert_eq!(lines, vec![""]);
    }

    #[test]
    fn test_multi_command_exchange_order() {
        let channel = CommandChannel::new(SimMotor::new());
        let lines = channel.exchange("RW(0)\rRPA\r").unwrap();
        assert_eq!(lines, vec!["3075", "0"]);
    }
}
