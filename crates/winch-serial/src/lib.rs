//! # Winch Serial
//!
//! 绞车控制器的字节级双工通道抽象
//!
//! 提供统一的 [`Transport`] trait，两个实现：
//!
//! - [`SerialPortTransport`]: 真实 RS-232 串口（`serialport` crate）
//! - [`sim::SimMotor`]: 实现同一设备协议的确定性模拟器，
//!   用于桌面开发与测试
//!
//! 上层（命令通道）只做字节读写；行成帧、响应计数都在上层完成。

use std::time::Duration;
use thiserror::Error;

pub mod port;
pub mod sim;

pub use port::SerialPortTransport;
pub use sim::{LoadModel, SimHandle, SimMotor};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    /// 打开串口失败（启动时致命：没有经过验证的设备就没有绞车可言）
    #[error("Failed to open serial port {port}: {message}")]
    Open { port: String, message: String },

    /// 读写 I/O 错误
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// 字节级双工传输
///
/// 读取永远有界：超时或对端静默返回 `Ok(None)`，绝不无限阻塞。
pub trait Transport: Send {
    /// 写出整个字节串
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// 读一个字节
    ///
    /// `Ok(None)` 表示本次读取窗口内没有数据（超时或流结束）。
    fn read_byte(&mut self) -> Result<Option<u8>, TransportError>;

    /// 设置单次读取的超时上限
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;
}
