//! # Winch Driver
//!
//! 命令通道与设备会话层
//!
//! - [`CommandChannel`]: 在一把互斥锁下完成"写命令 + 读响应"的
//!   原子交换，保证多线程命令不会在线上交织
//! - [`Motor`]: 一次设备会话 —— 握手、方言选择、单位换算、
//!   低层运动命令与批量状态采样
//!
//! 握手失败是致命的：没有经过验证的设备身份，任何绞车操作都
//! 没有意义，初始化直接向上返回 [`DriverError::Handshake`]。

pub mod channel;
pub mod motor;

pub use channel::{ChannelError, CommandChannel};
pub use motor::{Motor, MotorOptions, MotorState};

use thiserror::Error;
use winch_protocol::{GeometryError, ProtocolError};

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 命令通道错误
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 几何参数非法
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// 初始握手失败（设备不可用，启动期致命）
    #[error("Device handshake failed: {0}")]
    Handshake(String),
}
