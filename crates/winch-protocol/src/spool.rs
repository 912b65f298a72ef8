//! 绕线筒几何模型
//!
//! 钢缆一圈圈绕在筒上，有效半径随放线量变化：满筒时在外半径
//! 附近，放空后回落到筒芯半径。几何参数在启动时从配置加载，
//! 采样率在握手后由设备提供。

use thiserror::Error;

/// 几何参数校验错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Outer radius ({outer} m) must exceed inner radius ({inner} m)")]
    RadiusOrder { outer: f64, inner: f64 },

    #[error("Field {0} must be positive")]
    NonPositive(&'static str),
}

/// 绕线筒与传动链的几何描述
///
/// 默认值来自实测标定；换一台绞车必须重新标定，尤其是半径和
/// 满筒圈数（见 `wire_area` 的推导）。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SpoolGeometry {
    /// 编码器每转计数（17/23 机座电机标准值 4000）
    pub counts_per_rev: f64,
    /// 减速箱传动比
    pub gear_ratio: f64,
    /// 筒芯半径（m）
    pub radius_inner: f64,
    /// 满筒外半径（m）
    pub radius_outer: f64,
    /// 筒宽（m）
    pub spool_width: f64,
    /// 满筒总圈数
    pub full_spool_revs: f64,
    /// 设备速度单位的对称限幅值
    pub max_device_velocity: f64,
}

impl Default for SpoolGeometry {
    fn default() -> Self {
        Self {
            counts_per_rev: 4000.0,
            gear_ratio: 28.0,
            radius_inner: 0.054 / 2.0 - 0.0023,
            radius_outer: 0.154 / 2.0 - 0.012,
            spool_width: 0.031,
            full_spool_revs: 415.0,
            max_device_velocity: 3_000_000.0,
        }
    }
}

impl SpoolGeometry {
    /// 校验几何不变量
    ///
    /// 外半径必须大于内半径（否则导出的钢缆截面积非正），
    /// 其余各量必须为正。
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.counts_per_rev <= 0.0 {
            return Err(GeometryError::NonPositive("counts_per_rev"));
        }
        if self.gear_ratio <= 0.0 {
            return Err(GeometryError::NonPositive("gear_ratio"));
        }
        if self.radius_inner <= 0.0 {
            return Err(GeometryError::NonPositive("radius_inner"));
        }
        if self.spool_width <= 0.0 {
            return Err(GeometryError::NonPositive("spool_width"));
        }
        if self.full_spool_revs <= 0.0 {
            return Err(GeometryError::NonPositive("full_spool_revs"));
        }
        if self.max_device_velocity <= 0.0 {
            return Err(GeometryError::NonPositive("max_device_velocity"));
        }
        if self.radius_outer <= self.radius_inner {
            return Err(GeometryError::RadiusOrder {
                outer: self.radius_outer,
                inner: self.radius_inner,
            });
        }
        Ok(())
    }

    /// 钢缆等效截面积（m²）
    ///
    /// 由满筒几何反推：`宽 × (外半径 − 内半径) / 满筒圈数`。
    /// 截面积是导出量，不要单独调它。
    pub fn wire_area(&self) -> f64 {
        self.spool_width * (self.radius_outer - self.radius_inner) / self.full_spool_revs
    }

    /// 满筒可放出的最大缆长（m）
    ///
    /// 绕线模型在满筒圈数处的闭式解：`π · 圈数 · (外半径 + 内半径)`。
    pub fn max_wire_out(&self) -> f64 {
        std::f64::consts::PI * self.full_spool_revs * (self.radius_outer + self.radius_inner)
    }
}
