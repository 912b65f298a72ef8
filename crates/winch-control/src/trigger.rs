//! 投放触发接口
//!
//! 自动驾驶仪通过一条信号线请求投放；绞车侧用另一条线回报
//! "投放中/已完成"。等待必须周期性调用 `poll` 保持取消响应 ——
//! 操作员在等信号时按急停，循环要立刻退出。

use winch_client::OperationError;

/// 投放触发信号线
pub trait CastTrigger {
    /// 阻塞等待下一次触发
    ///
    /// 实现必须在等待期间周期性调用 `poll`，并把它返回的取消
    /// 错误原样向上传播。
    fn wait_for_signal(
        &self,
        poll: &mut dyn FnMut() -> Result<(), OperationError>,
    ) -> Result<(), OperationError>;

    /// 回报：投放进行中
    fn signal_in_progress(&self);

    /// 回报：投放完成
    fn signal_complete(&self);
}
