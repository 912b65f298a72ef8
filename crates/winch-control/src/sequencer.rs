//! 投放序列
//!
//! 把运动原语组合成完整的工作流。布放是一次开启松弛监测的
//! 移动，速度剖面在仪器包仍扣在保护笼里时减速、脱笼后全速；
//! 回收是一次三段剖面的反向移动（远处全速、近笼慢速、最后
//! 中速进位），不做松弛监测 —— 监测只对放线有意义。
//!
//! 取消语义：序列循环（拖曳、触发循环）捕获 `cleanup = true`
//! 的取消，在同一线程上先把仪器包收回来，再把取消错误原样
//! 向上传播；`cleanup = false`（急停）直接传播，不再有任何
//! 运动。

use crate::telemetry::TelemetrySource;
use crate::trigger::CastTrigger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use winch_client::{
    DirectionConstraint, JobCallback, MoveRequest, OperationError, StartError, VelocityPolicy,
    WinchController,
};

/// 投放序列参数
///
/// 长度量是整机机械尺寸，速度比例与失速判据来自标定。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CastParams {
    /// 吊臂长度：全收位置到仪器包刚好扣进笼口的距离（m）
    pub arm_length: f64,
    /// 笼长：扣笼位置到完全脱笼的距离（m）
    pub cage_length: f64,
    /// 仍扣笼时的速度比例
    pub mated_speed_fraction: f64,
    /// 回收时接近笼口的速度比例
    pub approach_slow_fraction: f64,
    /// 回收最后进位的速度比例
    pub approach_final_fraction: f64,
    /// 拖曳模式回收保留的缆长余量（m）
    pub towyo_hold_out: f64,
    /// 布放段的轨迹加速度
    pub deploy_accel: u32,
    /// 力模式复位的收缆力（kg）
    pub haul_in_force_kg: f64,
    /// 复位后从硬止点退出的距离（m），卸掉电机静载
    pub ease_distance: f64,
    /// 布放移动的自由轮空转上限（毫秒）
    pub free_idle_ms: u64,
    /// 失速判据：此速度以上才算"在收缆"（m/s）
    pub stall_min_speed: f64,
    /// 失速判据：速度从最负值回弹超过此量视为堵转（m/s）
    pub stall_rebound: f64,
}

impl Default for CastParams {
    fn default() -> Self {
        Self {
            arm_length: 0.25,
            cage_length: 0.4,
            mated_speed_fraction: 0.3,
            approach_slow_fraction: 0.2,
            approach_final_fraction: 0.4,
            towyo_hold_out: 0.05,
            deploy_accel: 40,
            haul_in_force_kg: 9.0,
            ease_distance: 0.83,
            free_idle_ms: 2000,
            stall_min_speed: 0.005,
            stall_rebound: 0.002,
        }
    }
}

impl CastParams {
    /// 扣笼区长度：臂长 + 笼长
    pub fn mated_length(&self) -> f64 {
        self.arm_length + self.cage_length
    }

    /// 自由轮空转上限
    pub fn free_idle(&self) -> Duration {
        Duration::from_millis(self.free_idle_ms)
    }

    /// 布放速度剖面：扣笼区减速，脱笼后全速
    pub fn deploy_profile(&self, target_velocity: f64) -> VelocityPolicy {
        let mated = self.mated_length();
        let fraction = self.mated_speed_fraction;
        VelocityPolicy::profile(move |m| {
            if m < mated {
                fraction * target_velocity
            } else {
                target_velocity
            }
        })
    }

    /// 回收速度剖面：远处全速、近笼慢速、最后中速进位
    pub fn retrieve_profile(&self, target_velocity: f64) -> VelocityPolicy {
        let mated = self.mated_length();
        let arm = self.arm_length;
        let slow = self.approach_slow_fraction;
        let final_ = self.approach_final_fraction;
        VelocityPolicy::profile(move |m| {
            if m > mated {
                target_velocity
            } else if m > arm {
                slow * target_velocity
            } else {
                final_ * target_velocity
            }
        })
    }
}

/// 投放序列执行器
///
/// Clone 轻量（控制器是 Arc）。
#[derive(Clone)]
pub struct CastSequencer {
    controller: Arc<WinchController>,
    params: CastParams,
}

impl CastSequencer {
    pub fn new(controller: Arc<WinchController>, params: CastParams) -> Self {
        Self { controller, params }
    }

    /// 运动控制器
    pub fn controller(&self) -> &Arc<WinchController> {
        &self.controller
    }

    /// 序列参数
    pub fn params(&self) -> &CastParams {
        &self.params
    }

    /// 给定水深对应的布放缆长
    pub fn deploy_length(&self, max_depth: f64) -> f64 {
        max_depth + self.params.mated_length()
    }

    // ============================================================
    // 阻塞序列
    // ============================================================

    /// 布放：单次移动到 `水深 + 臂长 + 笼长`
    ///
    /// 开启松弛监测；速度剖面在扣笼区减速。
    pub fn cast_out(&self, max_depth: f64) -> Result<(), OperationError> {
        let ctrl = &self.controller;
        ctrl.supervisor().run_blocking("cast out", || {
            let target = self.deploy_length(max_depth);
            info!("cast out to {target:.2} m ({max_depth:.2} m depth)");
            let request = MoveRequest::to(target)
                .velocity_profile(self.params.deploy_profile(ctrl.target_velocity()))
                .direction(DirectionConstraint::OutOnly)
                .accel(self.params.deploy_accel)
                .monitor_slack()
                .max_idle(self.params.free_idle());
            ctrl.move_cable(&request)
        })
    }

    /// 回收：单次移动回零，三段速度剖面，不做松弛监测
    pub fn cast_in(&self) -> Result<(), OperationError> {
        let ctrl = &self.controller;
        ctrl.supervisor().run_blocking("cast in", || {
            info!("cast in to rest position");
            let request = MoveRequest::to(0.0)
                .velocity_profile(self.params.retrieve_profile(ctrl.target_velocity()))
                .direction(DirectionConstraint::InOnly);
            ctrl.move_cable(&request)
        })
    }

    /// 完整投放：布放 → 回收 → 可选复位
    pub fn cast(&self, max_depth: f64, reset: bool) -> Result<(), OperationError> {
        self.controller.supervisor().run_blocking("cast", || {
            self.cast_out(max_depth)?;
            self.cast_in()?;
            if reset {
                self.reset_by_force()?;
            }
            Ok(())
        })
    }

    /// 力模式复位
    ///
    /// 松闸、恒定反向力收缆，直到速度不再更负（机械堵转），
    /// 停车抱闸，退出一段距离卸载，然后把该位置定义为零点。
    pub fn reset_by_force(&self) -> Result<(), OperationError> {
        let ctrl = &self.controller;
        ctrl.supervisor().run_blocking("reset by force", || {
            let motor = ctrl.motor();
            let conv = motor.converter();
            let tick = ctrl.calibration().tick_interval();

            motor.release_brake()?;
            motor.start_force_move(-self.params.haul_in_force_kg)?;

            // 失速检测：跟踪最负速度；真正收过缆之后，速度回弹
            // 超过门槛并持续两个采样即认定堵转。单个采样的解析
            // 噪声就足以误触发，所以要连续两个。
            let mut most_negative = f64::INFINITY;
            let mut rebound_ticks = 0u32;
            loop {
                ctrl.poll()?;
                let sample = motor.sample_status()?;
                ctrl.monitor().update_from_sample(&sample, conv);
                let velocity = conv.instantaneous_velocity_mps(sample.velocity);

                if velocity < most_negative {
                    most_negative = velocity;
                    rebound_ticks = 0;
                } else if most_negative < -self.params.stall_min_speed
                    && velocity > most_negative + self.params.stall_rebound
                {
                    rebound_ticks += 1;
                    if rebound_ticks >= 2 {
                        info!(
                            "stall confirmed: velocity {velocity:.4} m/s after minimum {most_negative:.4} m/s"
                        );
                        break;
                    }
                } else {
                    rebound_ticks = 0;
                }
                spin_sleep::sleep(tick);
            }

            motor.stop_motor()?;
            motor.engage_brake()?;

            // 从止点退出来，卸掉电机上的静载
            ctrl.move_cable(&MoveRequest::by(self.params.ease_distance))?;
            motor.zero_position_reference()?;
            info!("position reference reset at {:.2} m off the stop", self.params.ease_distance);
            Ok(())
        })
    }

    /// 拖曳模式：反复布放到缩放深度、收到笼外，直到被取消
    ///
    /// `cleanup = true` 的取消会先把仪器包完整收回来再传播；
    /// 急停直接传播。
    pub fn towyo(
        &self,
        telemetry: &dyn TelemetrySource,
        depth_factor: f64,
    ) -> Result<(), OperationError> {
        let ctrl = &self.controller;
        ctrl.supervisor().run_blocking("tow-yo", || {
            let result = (|| -> Result<(), OperationError> {
                loop {
                    ctrl.poll()?;
                    let depth = telemetry.current_max_depth() * depth_factor;
                    info!("tow-yo: next drop to {depth:.2} m");
                    self.cast_out(depth)?;
                    // 只收到笼口外一点，下一次下放不用重新出笼
                    let hold = self.params.mated_length() + self.params.towyo_hold_out;
                    ctrl.move_cable(
                        &MoveRequest::to(hold).direction(DirectionConstraint::InOnly),
                    )?;
                }
            })();
            self.recover_on_cleanup_abort(result)
        })
    }

    /// 硬件触发的投放循环：等信号 → 回报进行中 → 投放 → 回报完成
    pub fn run_triggered_casts(
        &self,
        trigger: &dyn CastTrigger,
        telemetry: &dyn TelemetrySource,
    ) -> Result<(), OperationError> {
        let ctrl = &self.controller;
        ctrl.supervisor().run_blocking("cast on trigger", || {
            let result = (|| -> Result<(), OperationError> {
                loop {
                    info!("waiting for cast signal");
                    trigger.wait_for_signal(&mut || ctrl.poll())?;
                    info!("cast signal received");
                    trigger.signal_in_progress();
                    self.cast(telemetry.current_max_depth(), false)?;
                    trigger.signal_complete();
                }
            })();
            self.recover_on_cleanup_abort(result)
        })
    }

    /// 序列循环的统一取消出口
    ///
    /// 允许回收的取消：在当前线程上阻塞收回仪器包（后台线程槽
    /// 只有一个，序列自己占着），然后照样把取消错误传播上去。
    fn recover_on_cleanup_abort(
        &self,
        result: Result<(), OperationError>,
    ) -> Result<(), OperationError> {
        if let Err(OperationError::Aborted(signal)) = &result {
            if signal.cleanup {
                info!("sequence aborted with cleanup allowed, retrieving instrument");
                if let Err(e) = self.cast_in() {
                    warn!("recovery retrieve failed: {e}");
                }
            }
        }
        result
    }

    // ============================================================
    // 后台变体
    // ============================================================

    /// 后台完整投放
    pub fn cast_background(
        &self,
        max_depth: f64,
        reset: bool,
        callback: Option<JobCallback<()>>,
    ) -> Result<(), StartError> {
        let seq = self.clone();
        let ctrl = Arc::clone(&self.controller);
        self.controller.supervisor().spawn(
            "cast",
            move || seq.cast(max_depth, reset),
            move |_| ctrl.handle_abort(),
            callback,
        )
    }

    /// 后台回收
    pub fn cast_in_background(
        &self,
        callback: Option<JobCallback<()>>,
    ) -> Result<(), StartError> {
        let seq = self.clone();
        let ctrl = Arc::clone(&self.controller);
        self.controller.supervisor().spawn(
            "cast in",
            move || seq.cast_in(),
            move |_| ctrl.handle_abort(),
            callback,
        )
    }

    /// 后台力模式复位
    pub fn reset_background(&self, callback: Option<JobCallback<()>>) -> Result<(), StartError> {
        let seq = self.clone();
        let ctrl = Arc::clone(&self.controller);
        self.controller.supervisor().spawn(
            "reset by force",
            move || seq.reset_by_force(),
            move |_| ctrl.handle_abort(),
            callback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_profile_shape() {
        let params = CastParams::default();
        let profile = params.deploy_profile(0.25);
        // 扣笼区（< 0.65 m）减速
        assert!((profile.target_for(0.1) - 0.075).abs() < 1e-12);
        assert!((profile.target_for(0.64) - 0.075).abs() < 1e-12);
        // 脱笼后全速
        assert!((profile.target_for(0.66) - 0.25).abs() < 1e-12);
        assert!((profile.target_for(20.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_retrieve_profile_three_segments() {
        let params = CastParams::default();
        let profile = params.retrieve_profile(0.25);
        // 远处全速
        assert!((profile.target_for(5.0) - 0.25).abs() < 1e-12);
        // 近笼慢速（0.25 < m <= 0.65）
        assert!((profile.target_for(0.5) - 0.05).abs() < 1e-12);
        // 最后进位中速（m <= 0.25）
        assert!((profile.target_for(0.1) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_deploy_length() {
        let params = CastParams::default();
        assert!((params.mated_length() - 0.65).abs() < 1e-12);
    }
}
