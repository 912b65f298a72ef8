//! 遥测源接口
//!
//! 水深与船速来自独立的 NMEA 声呐采集线程（不在核心内）。
//! 序列代码只读两个量，接口就只有两个量。

/// 深度/速度遥测源
pub trait TelemetrySource: Send + Sync {
    /// 当前最大水深（m）
    fn current_max_depth(&self) -> f64;

    /// 当前平台速度（m/s）
    fn current_velocity(&self) -> f64;
}

/// 固定深度源
///
/// 操作员指定的深度覆盖值，也是测试里的标准替身。
#[derive(Debug, Clone, Copy)]
pub struct FixedDepth(pub f64);

impl TelemetrySource for FixedDepth {
    fn current_max_depth(&self) -> f64 {
        self.0
    }

    fn current_velocity(&self) -> f64 {
        0.0
    }
}
