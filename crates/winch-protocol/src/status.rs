//! 16 位状态字解码
//!
//! `RW(0)` 返回的状态字在每个控制循环周期重新读取，
//! 不做跨周期缓存。

use bilge::prelude::*;

/// 伺服移动正常结束时的状态字
///
/// ready + motor_off + 两条硬件使能线（bit 0、1、10、11）。
/// 轨迹结束后读到其他任何组合都会触发一次诊断报告。
pub const BENIGN_STOP: u16 = 0x0C03;

/// 设备状态字位域
///
/// 位序与固件手册一致：Bit 0 为 ready，依次向高位排列。
/// bilge 默认 LSB first 位序，与设备位编号一致。
#[bitsize(16)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq, Eq)]
pub struct StatusWord {
    pub ready: bool,            // Bit 0
    pub motor_off: bool,        // Bit 1
    pub in_trajectory: bool,    // Bit 2: 轨迹进行中
    pub bus_volt_fault: bool,   // Bit 3
    pub peak_overcurrent: bool, // Bit 4
    pub temp_fault: bool,       // Bit 5
    pub pos_fault: bool,        // Bit 6: 位置错误
    pub vel_limit: bool,        // Bit 7
    pub rt_temp: bool,          // Bit 8
    pub pos_error_limit: bool,  // Bit 9
    pub hw_right_enabled: bool, // Bit 10
    pub hw_left_enabled: bool,  // Bit 11
    pub right_fault_hist: bool, // Bit 12
    pub left_fault_hist: bool,  // Bit 13
    pub right_fault_now: bool,  // Bit 14
    pub left_fault_now: bool,   // Bit 15
}

impl StatusWord {
    /// 从原始 16 位值构造
    pub fn from_raw(raw: u16) -> Self {
        Self::from(raw)
    }

    /// 原始 16 位值
    pub fn raw(&self) -> u16 {
        u16::from(*self)
    }

    /// 是否为伺服移动的预期良性结束状态
    pub fn is_benign_stop(&self) -> bool {
        self.raw() == BENIGN_STOP
    }

    /// 渲染为逐标志位的诊断文本行
    ///
    /// 供移动结束异常时输出到日志，格式沿用固件手册的标志命名。
    pub fn report_lines(&self) -> Vec<String> {
        const NAMES: [&str; 16] = [
            "ready",
            "motor_off",
            "trajectory",
            "bus_volt_fault",
            "peak_overcurrent",
            "temp_fault",
            "pos_fault",
            "vel_limit",
            "rt_temp",
            "pos_error_limit",
            "hw_right_enabled",
            "hw_left_enabled",
            "right_fault_hist",
            "left_fault_hist",
            "right_fault_now",
            "left_fault_now",
        ];
        let raw = self.raw();
        NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{name:>16}: {}", (raw >> i) & 1))
            .collect()
    }
}

/// 一次批量状态查询的完整采样
///
/// 全部为设备原生单位；换算到物理单位由
/// [`UnitConverter`](crate::units::UnitConverter) 负责。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSample {
    /// 状态字
    pub status: StatusWord,
    /// 瞬时速度（VA，设备单位）
    pub velocity: f64,
    /// 电流（UIA）
    pub current: f64,
    /// 力矩（RTRQ）
    pub torque: f64,
    /// 编码器位置（计数）
    pub position: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_stop_decodes() {
        let sw = StatusWord::from_raw(BENIGN_STOP);
        assert!(sw.ready());
        assert!(sw.motor_off());
        assert!(!sw.in_trajectory());
        assert!(sw.hw_right_enabled());
        assert!(sw.hw_left_enabled());
        assert!(sw.is_benign_stop());
    }

    #[test]
    fn test_trajectory_bit() {
        // bit 2 置位 = 轨迹进行中
        let sw = StatusWord::from_raw(0x0C03 | 0x0004);
        assert!(sw.in_trajectory());
        assert!(!sw.is_benign_stop());
    }

    #[test]
    fn test_fault_bits() {
        let sw = StatusWord::from_raw(1 << 6);
        assert!(sw.pos_fault());

        let sw = StatusWord::from_raw(1 << 9);
        assert!(sw.pos_error_limit());

        let sw = StatusWord::from_raw(1 << 15);
        assert!(sw.left_fault_now());
    }

    #[test]
    fn test_roundtrip_raw() {
        for raw in [0u16, 1, 3075, 0xFFFF, 0x8421] {
            assert_eq!(StatusWord::from_raw(raw).raw(), raw);
        }
    }

    #[test]
    fn test_report_lines_format() {
        let lines = StatusWord::from_raw(3).report_lines();
        assert_eq!(lines.len(), 16);
        assert!(lines[0].ends_with("ready: 1"));
        assert!(lines[2].ends_with("trajectory: 0"));
    }
}
