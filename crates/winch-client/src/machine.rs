//! 松弛感知的移动状态机
//!
//! 三个状态：
//!
//! - **FREE**：松闸、零力矩 —— 线在外力（重力/水阻）作用下自由
//!   放出，电机不驱动
//! - **SERVO**：闭环位置/速度轨迹
//! - **DONE**：终态
//!
//! 向外放线且开启松弛监测时从 FREE 起步：先让仪器包自重把线
//! 拉起来，转速到目标的 25% 再切入伺服，避免电机把松弛的线
//! 继续往外推（缠筒事故的主要来源）。伺服中检测到松弛（电流
//! 超标且力矩超过速度相关阈值）则退回 FREE。
//!
//! 每个周期一次批量状态查询 + 一次取消轮询 + 固定休眠。
//! 无论从哪条路径退出（完成、放弃、取消、错误），[`StopGuard`]
//! 都保证停车并重新抱闸 —— 取消信号在周期中途到达也跳不过它。

use crate::controller::Calibration;
use crate::monitor::Monitor;
use crate::policy::VelocityPolicy;
use crate::request::{DirectionConstraint, MoveRequest, MoveTarget};
use crate::supervisor::Supervisor;
use crate::OperationError;
use std::time::Instant;
use tracing::{debug, info, warn};
use winch_driver::{DriverError, Motor};

/// 状态机相位
enum MovePhase {
    /// 自由轮：记录空转起点
    Free { idle_since: Instant },
    /// 伺服轨迹：记录上次下发的 VT，用于策略变化比较
    Servo { last_vt: i64 },
}

/// 退出清理守卫
///
/// 停车 + 抱闸必须在每条退出路径上执行。成功路径显式调用
/// [`StopGuard::finish`] 以便传播清理错误；其余路径（`?` 提前
/// 返回、取消）由 `Drop` 兜底，错误只能记日志。
struct StopGuard<'a> {
    motor: &'a Motor,
    finished: bool,
}

impl<'a> StopGuard<'a> {
    fn new(motor: &'a Motor) -> Self {
        Self {
            motor,
            finished: false,
        }
    }

    fn cleanup(motor: &Motor) -> Result<(), DriverError> {
        motor.stop_motor()?;
        motor.engage_brake()
    }

    /// 成功路径的显式清理
    fn finish(mut self) -> Result<(), DriverError> {
        self.finished = true;
        Self::cleanup(self.motor)
    }
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = Self::cleanup(self.motor) {
                warn!("stop-and-brake cleanup failed during unwind: {e}");
            }
        }
    }
}

/// 一次移动的执行环境
pub(crate) struct MoveLoop<'a> {
    pub motor: &'a Motor,
    pub supervisor: &'a Supervisor,
    pub monitor: &'a Monitor,
    pub calibration: &'a Calibration,
    pub default_velocity: f64,
}

impl MoveLoop<'_> {
    /// 执行移动请求
    pub fn run(&self, request: &MoveRequest) -> Result<(), OperationError> {
        let conv = self.motor.converter();
        let cal = self.calibration;

        // 起点取缓存读数，足够新就不再打扰设备；
        // 方向守卫因此可以零命令返回
        let start = self
            .monitor
            .cable
            .get_or_fetch(cal.position_cache_max_age(), || self.motor.read_cable_out())?;

        let target_m = match request.target {
            MoveTarget::Absolute(m) => m,
            MoveTarget::Relative(d) => start.meters + d,
        };

        // 方向守卫：约束已满足 → 无操作，不发任何命令
        match request.direction {
            DirectionConstraint::OutOnly if start.meters >= target_m => {
                info!(
                    "move to {target_m:.2} m is a no-op: already at {:.2} m with out-only constraint",
                    start.meters
                );
                return Ok(());
            }
            DirectionConstraint::InOnly if start.meters <= target_m => {
                info!(
                    "move to {target_m:.2} m is a no-op: already at {:.2} m with in-only constraint",
                    start.meters
                );
                return Ok(());
            }
            _ => {}
        }

        let outward = target_m >= start.meters;
        let target_counts = conv.position_m_to_device(target_m).round() as i64;
        let accel = request.accel.unwrap_or(self.motor.default_accel());
        let policy = request
            .velocity
            .clone()
            .unwrap_or(VelocityPolicy::Constant(self.default_velocity));
        let slack_active = request.monitor_slack && outward;

        info!(
            "starting move to {target_m:.2} m (from {:.2} m, slack monitoring {})",
            start.meters,
            if slack_active { "on" } else { "off" }
        );

        // 从这里起，所有退出路径都要停车抱闸
        let guard = StopGuard::new(self.motor);

        let mut phase = if slack_active {
            self.motor.release_brake()?;
            self.motor.start_force_move(0.0)?;
            MovePhase::Free {
                idle_since: Instant::now(),
            }
        } else {
            let vt = conv
                .velocity_mps_to_device(policy.target_for(start.meters).abs())
                .round() as i64;
            self.motor.start_position_move(target_counts, vt, accel)?;
            MovePhase::Servo { last_vt: vt }
        };

        loop {
            // 每个周期至少一次取消轮询
            self.supervisor.poll()?;

            let sample = self.motor.sample_status()?;
            self.monitor.update_from_sample(&sample, conv);

            let cable_m = conv.position_device_to_m(sample.position);
            let inst_mps = conv.instantaneous_velocity_mps(sample.velocity);
            let target_mps = policy.target_for(cable_m).abs();

            phase = match phase {
                MovePhase::Free { idle_since } => {
                    // 已越过目标：自由轮阶段就到位了
                    if (outward && cable_m >= target_m) || (!outward && cable_m <= target_m) {
                        info!("target passed while free-wheeling, done");
                        break;
                    }

                    if sample.torque.abs() < cal.free_torque_epsilon
                        && inst_mps.abs() >= cal.free_velocity_fraction * target_mps
                    {
                        // 线已被拉起来：切入伺服
                        info!(
                            "free-wheeled up to {:.3} m/s (>= {:.0}% of {:.3}), switching to servo",
                            inst_mps,
                            cal.free_velocity_fraction * 100.0,
                            target_mps
                        );
                        let vt = conv.velocity_mps_to_device(target_mps).round() as i64;
                        self.motor.start_position_move(target_counts, vt, accel)?;
                        MovePhase::Servo { last_vt: vt }
                    } else if idle_since.elapsed() >= request.max_idle {
                        // 空转超时：线始终没张起来，放弃
                        info!(
                            "free-wheel idle for {:.1?} without reaching speed, giving up",
                            idle_since.elapsed()
                        );
                        break;
                    } else {
                        if sample.torque.abs() >= cal.free_torque_epsilon {
                            debug!("waiting for true free-wheel, torque = {}", sample.torque);
                        }
                        MovePhase::Free { idle_since }
                    }
                }

                MovePhase::Servo { last_vt } => {
                    if !sample.status.in_trajectory() {
                        // 轨迹结束；异常的终止状态出一份诊断报告（非致命）
                        if !sample.status.is_benign_stop() {
                            warn!(
                                "trajectory ended with status {:#06x}, dumping report",
                                sample.status.raw()
                            );
                            if let Err(e) = self.motor.status_report(Some(sample.status)) {
                                warn!("status report failed: {e}");
                            }
                        }
                        break;
                    }

                    let slack_threshold = cal.slack_torque_threshold(sample.velocity);
                    if slack_active
                        && sample.current > cal.slack_current_threshold
                        && sample.torque > slack_threshold
                    {
                        // 松弛：电机在"用力推线出去"。退回自由轮，
                        // 让外力重新把线张起来
                        info!(
                            "line appears slack (current {} > {}, torque {} > {:.0})",
                            sample.current,
                            cal.slack_current_threshold,
                            sample.torque,
                            slack_threshold
                        );
                        self.motor.issue_zero_torque()?;
                        MovePhase::Free {
                            idle_since: Instant::now(),
                        }
                    } else {
                        // 速度策略随缆长变化：重发轨迹命令
                        let vt = conv.velocity_mps_to_device(target_mps).round() as i64;
                        if (vt - last_vt).abs() as f64 > cal.vt_reissue_epsilon {
                            debug!("velocity policy changed (VT {last_vt} -> {vt}), reissuing");
                            self.motor.start_position_move(target_counts, vt, accel)?;
                            MovePhase::Servo { last_vt: vt }
                        } else {
                            MovePhase::Servo { last_vt }
                        }
                    }
                }
            };

            spin_sleep::sleep(cal.tick_interval());
        }

        guard.finish().map_err(OperationError::from)
    }
}
