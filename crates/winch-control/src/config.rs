//! 进程配置
//!
//! 串口、几何、标定与投放参数的 TOML 文件。所有字段都有默认
//! 值，配置文件只需要写与默认不同的部分。

use crate::sequencer::CastParams;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use winch_client::Calibration;
use winch_driver::MotorOptions;
use winch_protocol::SpoolGeometry;

/// 绞车进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WinchConfig {
    /// 串口设备路径
    pub port: String,
    /// 波特率
    pub baud_rate: u32,
    /// 行读取超时（毫秒）
    pub read_timeout_ms: u64,
    /// 默认轨迹加速度
    pub accel: u32,
    /// 功率上限比例
    pub max_power_fraction: f64,
    /// 操作员深度覆盖（设置后遥测深度被忽略）
    pub depth_override: Option<f64>,
    /// 绕线筒几何
    pub geometry: SpoolGeometry,
    /// 设备标定
    pub calibration: Calibration,
    /// 投放序列参数
    pub cast: CastParams,
}

impl Default for WinchConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            read_timeout_ms: 1000,
            accel: 200,
            max_power_fraction: 1.0,
            depth_override: None,
            geometry: SpoolGeometry::default(),
            calibration: Calibration::default(),
            cast: CastParams::default(),
        }
    }
}

impl WinchConfig {
    /// 从 TOML 文件加载
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading winch config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing winch config {}", path.display()))?;
        config
            .geometry
            .validate()
            .with_context(|| format!("invalid spool geometry in {}", path.display()))?;
        Ok(config)
    }

    /// 导出会话选项
    pub fn motor_options(&self) -> MotorOptions {
        MotorOptions {
            accel: self.accel,
            max_power_fraction: self.max_power_fraction,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_valid() {
        let config = WinchConfig::default();
        config.geometry.validate().unwrap();
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
port = "/dev/ttyS3"
baud_rate = 19200

[cast]
haul_in_force_kg = 7.5
"#
        )
        .unwrap();

        let config = WinchConfig::load(file.path()).unwrap();
        assert_eq!(config.port, "/dev/ttyS3");
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.cast.haul_in_force_kg, 7.5);
        // 未写的字段保持默认
        assert_eq!(config.cast.arm_length, 0.25);
        assert_eq!(config.calibration.slack_current_threshold, 300.0);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = WinchConfig::load(Path::new("/nonexistent/winch.toml")).unwrap_err();
        assert!(err.to_string().contains("winch.toml"));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[geometry]
counts_per_rev = 4000.0
gear_ratio = 28.0
radius_inner = 0.08
radius_outer = 0.05
spool_width = 0.031
full_spool_revs = 415.0
max_device_velocity = 3000000.0
"#
        )
        .unwrap();
        assert!(WinchConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_roundtrip_serialization() {
        let config = WinchConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: WinchConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.port, config.port);
        assert_eq!(back.geometry, config.geometry);
    }
}
