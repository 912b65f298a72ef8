//! 移动请求
//!
//! 一次缆长移动的全部参数：目标、速度策略、方向约束、加速度、
//! 松弛监测开关和自由轮空转上限。链式构造，未给的参数用
//! 控制器标定的默认值。

use crate::policy::VelocityPolicy;
use std::time::Duration;

/// 移动目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveTarget {
    /// 绝对缆长（m，相对当前零点）
    Absolute(f64),
    /// 相对当前位置的增量（m）
    Relative(f64),
}

/// 方向约束
///
/// 约束已满足时移动是无操作：一条命令都不会发。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectionConstraint {
    /// 任意方向
    #[default]
    Either,
    /// 只允许向外放线
    OutOnly,
    /// 只允许向内收线
    InOnly,
}

/// 移动请求
#[derive(Debug, Clone)]
pub struct MoveRequest {
    /// 目标缆长
    pub target: MoveTarget,
    /// 速度策略；`None` 用控制器的目标速度
    pub velocity: Option<VelocityPolicy>,
    /// 方向约束
    pub direction: DirectionConstraint,
    /// 轨迹加速度覆盖
    pub accel: Option<u32>,
    /// 是否启用松弛监测（仅对向外放线有意义）
    pub monitor_slack: bool,
    /// 自由轮阶段的最大空转时长
    pub max_idle: Duration,
}

impl MoveRequest {
    /// 移动到绝对缆长
    pub fn to(meters: f64) -> Self {
        Self {
            target: MoveTarget::Absolute(meters),
            velocity: None,
            direction: DirectionConstraint::Either,
            accel: None,
            monitor_slack: false,
            max_idle: Duration::from_secs(2),
        }
    }

    /// 相对当前位置移动
    pub fn by(meters: f64) -> Self {
        Self {
            target: MoveTarget::Relative(meters),
            ..Self::to(0.0)
        }
    }

    /// 恒定速度
    pub fn velocity(mut self, mps: f64) -> Self {
        self.velocity = Some(VelocityPolicy::Constant(mps));
        self
    }

    /// 速度剖面（缆长的函数）
    pub fn velocity_profile(mut self, policy: VelocityPolicy) -> Self {
        self.velocity = Some(policy);
        self
    }

    /// 方向约束
    pub fn direction(mut self, direction: DirectionConstraint) -> Self {
        self.direction = direction;
        self
    }

    /// 轨迹加速度
    pub fn accel(mut self, accel: u32) -> Self {
        self.accel = Some(accel);
        self
    }

    /// 启用松弛监测
    pub fn monitor_slack(mut self) -> Self {
        self.monitor_slack = true;
        self
    }

    /// 自由轮空转上限
    pub fn max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }
}
