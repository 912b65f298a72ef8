//! 真实串口传输
//!
//! 控制器侧是 RS-232，8N1。波特率与读超时由配置给出；
//! 读超时必须有界，行读取的"空响应"语义依赖它。

use crate::{Transport, TransportError};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::info;

/// `serialport` 包装
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
}

impl SerialPortTransport {
    /// 打开串口
    ///
    /// # 错误
    /// - `TransportError::Open`: 设备不存在或被占用。调用方应把
    ///   它当作 DeviceUnavailable 处理（启动期致命）。
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open()
            .map_err(|e| TransportError::Open {
                port: path.to_string(),
                message: e.to_string(),
            })?;
        info!("Opened winch serial port {} at {} baud", path, baud_rate);
        Ok(Self { port })
    }
}

impl Transport for SerialPortTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            // 零字节 = 流结束，按空响应处理
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;
        Ok(())
    }
}
