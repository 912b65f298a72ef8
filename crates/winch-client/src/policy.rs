//! 速度策略
//!
//! 移动的目标速度可以是常数，也可以是当前缆长的函数。
//! 策略在控制循环的每个周期针对当前缆长重新求值，
//! 这是"仪器包接近保护笼时减速"一类剖面的实现基础。

use std::fmt;
use std::sync::Arc;

/// 目标速度策略（m/s，幅值）
#[derive(Clone)]
pub enum VelocityPolicy {
    /// 恒定速度
    Constant(f64),
    /// 缆长 → 速度的剖面函数
    Profile(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl VelocityPolicy {
    /// 从闭包构造剖面策略
    pub fn profile(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        VelocityPolicy::Profile(Arc::new(f))
    }

    /// 当前缆长下的目标速度
    pub fn target_for(&self, cable_out_m: f64) -> f64 {
        match self {
            VelocityPolicy::Constant(v) => *v,
            VelocityPolicy::Profile(f) => f(cable_out_m),
        }
    }
}

impl fmt::Debug for VelocityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VelocityPolicy::Constant(v) => write!(f, "Constant({v})"),
            VelocityPolicy::Profile(_) => write!(f, "Profile(..)"),
        }
    }
}

impl From<f64> for VelocityPolicy {
    fn from(v: f64) -> Self {
        VelocityPolicy::Constant(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_policy() {
        let policy = VelocityPolicy::Constant(0.25);
        assert_eq!(policy.target_for(0.0), 0.25);
        assert_eq!(policy.target_for(50.0), 0.25);
    }

    #[test]
    fn test_profile_policy_depends_on_position() {
        let policy = VelocityPolicy::profile(|m| if m < 0.5 { 0.1 } else { 0.5 });
        assert_eq!(policy.target_for(0.2), 0.1);
        assert_eq!(policy.target_for(2.0), 0.5);
    }

    #[test]
    fn test_from_f64() {
        let policy: VelocityPolicy = 0.3.into();
        assert_eq!(policy.target_for(1.0), 0.3);
    }
}
