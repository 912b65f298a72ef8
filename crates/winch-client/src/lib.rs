//! # Winch Client
//!
//! 绞车高层运动控制
//!
//! - [`WinchController`]: 一次设备会话的运动控制器，缓存传感器
//!   读数，驱动检测松弛线缆的移动状态机
//! - [`Supervisor`]: 异步操作监督者 —— 同一时刻至多一个后台
//!   操作线程，协作式取消
//! - [`MoveRequest`] / [`VelocityPolicy`]: 移动参数与速度策略
//!
//! ## 取消语义
//!
//! 取消是数据而不是异常层级：[`AbortSignal`] 带一个 `cleanup`
//! 标志。`cleanup = true` 允许上层序列继续做安全回收动作；
//! `cleanup = false` 表示立即停止、不再有任何运动（急停）。
//! 信号在每个控制循环周期的显式轮询点被消费。

pub mod cancel;
pub mod controller;
mod machine;
pub mod monitor;
pub mod policy;
pub mod request;
pub mod supervisor;

pub use cancel::{AbortSignal, AbortSlot};
pub use controller::{Calibration, WinchController};
pub use monitor::{CachedReading, Monitor, Stamped};
pub use policy::VelocityPolicy;
pub use request::{DirectionConstraint, MoveRequest, MoveTarget};
pub use supervisor::{JobCallback, StartError, Supervisor};

use thiserror::Error;
use winch_driver::DriverError;

/// 操作级错误
#[derive(Error, Debug)]
pub enum OperationError {
    /// 操作被取消。`cleanup` 标志随错误向上传播，
    /// 让序列级代码决定是否继续做安全回收。
    #[error("Operation aborted (cleanup allowed: {})", .0.cleanup)]
    Aborted(AbortSignal),

    /// 驱动层错误
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

impl OperationError {
    /// 是否为取消
    pub fn is_abort(&self) -> bool {
        matches!(self, OperationError::Aborted(_))
    }
}
