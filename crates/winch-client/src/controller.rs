//! 绞车运动控制器
//!
//! 每个设备会话一个 [`WinchController`] 实例：拥有电机会话、
//! 操作监督者和缓存读数集。没有进程级单例。

use crate::cancel::AbortSignal;
use crate::machine::MoveLoop;
use crate::monitor::Monitor;
use crate::request::MoveRequest;
use crate::supervisor::{JobCallback, StartError, Supervisor};
use crate::OperationError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use winch_driver::Motor;
use winch_protocol::CableOut;

/// 设备特定的标定常数
///
/// 松弛阈值、力矩-速度拟合系数、经验修正都属于这里。这些值来自
/// 对具体整机的标定（空载/轻载扫速实验），换一台绞车必须重新
/// 标定，它们不是可推导的算法常数。
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Calibration {
    /// 默认目标缆速（m/s）
    pub target_velocity: f64,
    /// 松弛判据之一：电流阈值（设备单位）
    pub slack_current_threshold: f64,
    /// 力矩阈值拟合斜率（对 VA 的线性拟合，来自扫速标定）
    pub torque_fit_slope: f64,
    /// 力矩阈值拟合截距
    pub torque_fit_intercept: f64,
    /// 力矩阈值下限
    pub torque_floor: f64,
    /// 自由轮判据：力矩小于此值视为真自由轮
    pub free_torque_epsilon: f64,
    /// 自由轮 → 伺服的速度门槛（目标速度的比例）
    pub free_velocity_fraction: f64,
    /// 重发轨迹命令的 VT 变化门槛（设备单位）
    pub vt_reissue_epsilon: f64,
    /// 控制循环周期（毫秒）
    pub tick_interval_ms: u64,
    /// 方向守卫允许使用的缓存位置最大年龄（毫秒）
    pub position_cache_max_age_ms: u64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            target_velocity: 0.25,
            slack_current_threshold: 300.0,
            // 空载扫速实验的线性拟合（对放线方向的 RTRQ）
            torque_fit_slope: 2.845_938_43e-2,
            torque_fit_intercept: 1.067_443_38e3,
            torque_floor: 500.0,
            free_torque_epsilon: 1.0,
            free_velocity_fraction: 0.25,
            vt_reissue_epsilon: 1.0,
            tick_interval_ms: 50,
            position_cache_max_age_ms: 200,
        }
    }
}

impl Calibration {
    /// 速度相关的松弛力矩阈值：`max(floor, slope·va + intercept)`
    pub fn slack_torque_threshold(&self, va: f64) -> f64 {
        self.torque_floor
            .max(self.torque_fit_slope * va + self.torque_fit_intercept)
    }

    /// 控制循环周期
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// 缓存位置的最大年龄
    pub fn position_cache_max_age(&self) -> Duration {
        Duration::from_millis(self.position_cache_max_age_ms)
    }
}

/// 绞车运动控制器
pub struct WinchController {
    motor: Motor,
    supervisor: Supervisor,
    monitor: Monitor,
    calibration: Calibration,
    target_velocity: Mutex<f64>,
}

impl WinchController {
    /// 接管一个已完成握手的电机会话
    ///
    /// 返回 `Arc`：后台操作需要把控制器带进线程。
    pub fn new(motor: Motor, calibration: Calibration) -> Arc<Self> {
        let target_velocity = Mutex::new(calibration.target_velocity);
        Arc::new(Self {
            motor,
            supervisor: Supervisor::new(),
            monitor: Monitor::new(),
            calibration,
            target_velocity,
        })
    }

    /// 电机会话
    pub fn motor(&self) -> &Motor {
        &self.motor
    }

    /// 缓存读数集（展示层只读）
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// 标定常数
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// 操作监督者
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// 当前动作标签（展示层可见；无操作时 `None`）
    pub fn current_action(&self) -> Option<&'static str> {
        self.supervisor.current_action()
    }

    /// 取消轮询点
    ///
    /// 长操作每个控制循环周期至少调用一次。移动循环自身每周期
    /// 已轮询；序列级代码（等待触发信号等）也要调它保持取消
    /// 响应。
    pub fn poll(&self) -> Result<(), OperationError> {
        self.supervisor.poll()
    }

    /// 请求取消当前操作
    ///
    /// 电机先走快路径立即停车（可能根本没有操作在跑），协作
    /// 信号随后由运行中的操作在轮询点消费。
    pub fn abort(&self, cleanup: bool) {
        info!("abort requested (cleanup={cleanup})");
        if let Err(e) = self.motor.stop_motor() {
            warn!("fast-path stop on abort failed: {e}");
        }
        self.supervisor.raise_abort(AbortSignal { cleanup });
    }

    /// 默认目标缆速
    pub fn target_velocity(&self) -> f64 {
        *self.target_velocity.lock()
    }

    /// 调整默认目标缆速
    pub fn set_target_velocity(&self, mps: f64) {
        info!("new target velocity: {mps} m/s");
        *self.target_velocity.lock() = mps;
    }

    // ============================================================
    // 移动操作
    // ============================================================

    /// 阻塞执行移动请求
    pub fn move_cable(&self, request: &MoveRequest) -> Result<(), OperationError> {
        self.supervisor.run_blocking("move to position", || {
            self.run_move(request)
        })
    }

    /// 后台执行移动请求
    ///
    /// 接收方是 `Arc`：移动要带进后台线程。调用方克隆一份
    /// 句柄即可（`Arc` 克隆是指针开销）。
    ///
    /// # 错误
    /// - [`StartError::Busy`]: 已有后台操作在运行
    pub fn move_cable_background(
        self: Arc<Self>,
        request: MoveRequest,
        callback: Option<JobCallback<()>>,
    ) -> Result<(), StartError> {
        let ctrl = Arc::clone(&self);
        let ctrl_abort = Arc::clone(&self);
        self.supervisor.spawn(
            "move to position",
            move || ctrl.run_move(&request),
            move |_| ctrl_abort.handle_abort(),
            callback,
        )
    }

    /// 供序列级代码复用的移动入口（带外层动作标签时不覆盖）
    pub(crate) fn run_move(&self, request: &MoveRequest) -> Result<(), OperationError> {
        MoveLoop {
            motor: &self.motor,
            supervisor: &self.supervisor,
            monitor: &self.monitor,
            calibration: &self.calibration,
            default_velocity: self.target_velocity(),
        }
        .run(request)
    }

    /// 操作被取消后的兜底动作：停车
    ///
    /// 移动循环自身的清理守卫已经停过车；这里是给不经过状态机
    /// 的操作（力矩移动等）的统一出口。
    pub fn handle_abort(&self) {
        info!("handle_abort: stopping motor");
        if let Err(e) = self.motor.stop_motor() {
            warn!("stop on abort failed: {e}");
        }
    }

    // ============================================================
    // 直接运动原语
    // ============================================================

    /// 立即启动速度移动（GUI 滑条一类的手动控制）
    pub fn jog_velocity(&self, mps: f64) -> Result<(), OperationError> {
        self.motor.start_velocity_move(mps, None)?;
        Ok(())
    }

    /// 立即进入恒力模式（必须先松闸）
    pub fn hold_force(&self, kg: f64) -> Result<(), OperationError> {
        self.motor.release_brake()?;
        self.motor.start_force_move(kg)?;
        Ok(())
    }

    /// 停车并抱闸
    pub fn stop(&self) -> Result<(), OperationError> {
        self.motor.stop_motor()?;
        self.motor.engage_brake()?;
        Ok(())
    }

    /// 把当前位置定义为零点
    pub fn zero_here(&self) -> Result<(), OperationError> {
        self.motor.zero_position_reference()?;
        Ok(())
    }

    /// 设置功率上限比例
    pub fn set_max_power_fraction(&self, fraction: f64) -> Result<(), OperationError> {
        self.motor.set_max_power_fraction(fraction)?;
        Ok(())
    }

    // ============================================================
    // 缓存读数
    // ============================================================

    /// 缆长（缓存命中或现场查询）
    pub fn cable_out(&self, max_age: Duration) -> Result<CableOut, OperationError> {
        Ok(self
            .monitor
            .cable
            .get_or_fetch(max_age, || self.motor.read_cable_out())?)
    }

    /// 电机电流
    pub fn motor_current(&self, max_age: Duration) -> Result<f64, OperationError> {
        Ok(self
            .monitor
            .current
            .get_or_fetch(max_age, || self.motor.read_current())?)
    }

    /// 电机力矩
    pub fn motor_torque(&self, max_age: Duration) -> Result<f64, OperationError> {
        Ok(self
            .monitor
            .torque
            .get_or_fetch(max_age, || self.motor.read_torque())?)
    }

    /// 状态字诊断报告
    pub fn status_report(&self) -> Result<Vec<String>, OperationError> {
        Ok(self.motor.status_report(None)?)
    }
}
