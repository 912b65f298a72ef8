//! 物理单位 ⇄ 设备单位换算
//!
//! # 速度
//!
//! 固件手册给出 `VT = rps · (counts/rev / sample_rate) · 65536`，
//! 再乘减速比换算到筒轴。前导系数 2 与反解瞬时速度时的 0.5 是
//! 纯经验修正，来自整机标定，换设备必须复测，不要当作单位推导
//! 的一部分去"修正"它们。
//!
//! # 位置
//!
//! 缆绕在筒上，放线越多有效半径越小。设 `rev` 为筒累计转数，
//! 放出缆长为
//!
//! ```text
//! m(rev) = 2π·rev·R_outer − π·rev²·A/w
//! ```
//!
//! 其中 `A` 为钢缆截面积、`w` 为筒宽。反向换算解一元二次方程
//! `(πA/w)·rev² − 2πR_outer·rev + m = 0`，恒取较小根 —— 较大根
//! 落在"负半径"的非物理分支上。测量噪声可能把判别式压成负数，
//! 此时按零截断而不是让 NaN 传播出去。

use crate::dialect::CommandDialect;
use crate::spool::SpoolGeometry;
use std::f64::consts::PI;

/// 缆长读数：米与筒转数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CableOut {
    /// 已放出缆长（m）
    pub meters: f64,
    /// 筒累计转数
    pub revolutions: f64,
}

/// 单位换算器
///
/// 几何参数来自配置，采样率在握手时由设备报出，两者合在一起
/// 才能完成速度换算。
#[derive(Debug, Clone, Copy)]
pub struct UnitConverter {
    geometry: SpoolGeometry,
    sample_rate: u32,
}

impl UnitConverter {
    /// 组合几何与设备采样率
    pub fn new(geometry: SpoolGeometry, sample_rate: u32) -> Self {
        Self {
            geometry,
            sample_rate,
        }
    }

    /// 几何参数
    pub fn geometry(&self) -> &SpoolGeometry {
        &self.geometry
    }

    /// 每 1 m/s 对应的设备速度单位
    fn velocity_scale(&self) -> f64 {
        let g = &self.geometry;
        let circumference = 2.0 * PI * g.radius_outer;
        // 前导的 2 是经验修正，保持原样
        2.0 / circumference * g.counts_per_rev / self.sample_rate as f64 * 65536.0 * g.gear_ratio
    }

    /// 物理速度（m/s）→ 设备速度单位，对称限幅
    pub fn velocity_mps_to_device(&self, mps: f64) -> f64 {
        let max = self.geometry.max_device_velocity;
        (mps * self.velocity_scale()).clamp(-max, max)
    }

    /// 设备速度单位 → 物理速度（m/s）
    pub fn velocity_device_to_mps(&self, device: f64) -> f64 {
        device / self.velocity_scale()
    }

    /// 设备报告的瞬时速度（VA）→ 物理速度（m/s）
    ///
    /// VA 的量纲与 VT 差一个 2 倍，0.5 是配套的经验修正。
    pub fn instantaneous_velocity_mps(&self, va: f64) -> f64 {
        0.5 * self.velocity_device_to_mps(va)
    }

    /// 编码器计数 → 筒转数
    pub fn counts_to_revs(&self, counts: f64) -> f64 {
        counts / self.geometry.counts_per_rev / self.geometry.gear_ratio
    }

    /// 筒转数 → 编码器计数
    pub fn revs_to_counts(&self, revs: f64) -> f64 {
        revs * self.geometry.counts_per_rev * self.geometry.gear_ratio
    }

    /// 编码器计数 → 已放出缆长（m）
    pub fn position_device_to_m(&self, counts: f64) -> f64 {
        let g = &self.geometry;
        let revs = self.counts_to_revs(counts);
        2.0 * PI * revs * g.radius_outer - PI * revs * revs * g.wire_area() / g.spool_width
    }

    /// 缆长（m）→ 编码器计数
    ///
    /// 解绕线模型的二次方程，取物理有效的较小根。
    pub fn position_m_to_device(&self, meters: f64) -> f64 {
        let g = &self.geometry;
        let a = PI * g.wire_area() / g.spool_width;
        let b = -2.0 * PI * g.radius_outer;
        let c = meters;
        // 噪声可能把判别式推成轻微负值，截断到零
        let discriminant = (b * b - 4.0 * a * c).max(0.0);
        let rev = (-b - discriminant.sqrt()) / (2.0 * a);
        self.revs_to_counts(rev)
    }

    /// 编码器计数 → 缆长与转数
    pub fn cable_out(&self, counts: f64) -> CableOut {
        CableOut {
            meters: self.position_device_to_m(counts),
            revolutions: self.counts_to_revs(counts),
        }
    }

    /// 质量（kg）→ 设备力矩单位
    ///
    /// kg 不是力，但没人用牛顿记自家仪器包的重量。量程随方言变化。
    pub fn force_kg_to_device(&self, kg: f64, dialect: CommandDialect) -> f64 {
        kg * dialect.torque_units_per_kg()
    }

    /// 设备力矩单位 → 质量（kg）
    pub fn force_device_to_kg(&self, device: f64, dialect: CommandDialect) -> f64 {
        device / dialect.torque_units_per_kg()
    }
}
