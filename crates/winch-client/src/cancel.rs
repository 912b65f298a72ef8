//! 协作式取消
//!
//! 取消信号放在一个槽里，由长操作在显式轮询点消费。
//! 槽被消费即清空，同一个信号不会打断两个操作。

use crate::OperationError;
use parking_lot::Mutex;

/// 取消信号
///
/// `cleanup = true`: 上层序列仍允许发起低层动作收尾（比如把
/// 仪器包收回来）。`cleanup = false`: 立即停止，不再有任何
/// 运动 —— 急停路径。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortSignal {
    /// 是否允许上层继续做回收动作
    pub cleanup: bool,
}

/// 取消信号槽
///
/// 要么为空，要么持有一个待消费的信号。
#[derive(Default)]
pub struct AbortSlot {
    slot: Mutex<Option<AbortSignal>>,
}

impl AbortSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入取消信号（覆盖已有信号）
    pub fn raise(&self, signal: AbortSignal) {
        *self.slot.lock() = Some(signal);
    }

    /// 清空槽（操作退出时调用，避免信号误伤下一个操作）
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }

    /// 轮询：有信号则消费并返回 [`OperationError::Aborted`]
    ///
    /// 长操作必须保证每个控制循环周期至少调用一次。
    pub fn poll(&self) -> Result<(), OperationError> {
        match self.slot.lock().take() {
            Some(signal) => Err(OperationError::Aborted(signal)),
            None => Ok(()),
        }
    }

    /// 是否有未消费的信号
    pub fn is_raised(&self) -> bool {
        self.slot.lock().is_some()
    }
}
