//! 设备会话
//!
//! [`Motor`] 是一次串口会话的拥有者：握手验证设备身份、选定
//! 命令方言，然后提供低层运动命令和读数查询。每个设备会话
//! 构造一个 `Motor` 实例，没有进程级单例。

use crate::channel::CommandChannel;
use crate::DriverError;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use winch_protocol::{
    bare_command, position_move, print_query, safe_velocity_mode, set_register, stop_command,
    torque_move, velocity_move, zero_torque, CableOut, CommandDialect, SpoolGeometry, StatusQuery,
    StatusSample, StatusWord, UnitConverter,
};
use winch_protocol::response::{parse_float, split_rate_version};
use winch_serial::Transport;

/// 会话期设备状态
///
/// 只在持有会话锁的路径上修改。
#[derive(Debug, Clone)]
pub struct MotorState {
    /// 固件版本串（握手原文）
    pub firmware_version: String,
    /// 选定的命令方言
    pub dialect: CommandDialect,
    /// 设备采样率（Hz）
    pub sample_rate: u32,
    /// 当前功率上限比例（0.0 - 1.0）
    pub power_fraction: f64,
}

/// 会话选项
#[derive(Debug, Clone)]
pub struct MotorOptions {
    /// 默认轨迹加速度
    pub accel: u32,
    /// 初始功率上限比例
    pub max_power_fraction: f64,
    /// 行读取超时
    pub read_timeout: Duration,
}

impl Default for MotorOptions {
    fn default() -> Self {
        Self {
            accel: 200,
            max_power_fraction: 1.0,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// 电机会话
pub struct Motor {
    channel: CommandChannel,
    state: Mutex<MotorState>,
    converter: UnitConverter,
    status_query: StatusQuery,
    default_accel: u32,
}

impl Motor {
    /// 建立会话：握手、选方言、初始化设备
    ///
    /// 初始化序列：关回显 → 查采样率/版本（`RSP`）→ 选方言 →
    /// 刹车交给轨迹管理（仅 5.x）→ 放开位置误差限 → 设功率上限 →
    /// 位置参考清零。
    ///
    /// # 错误
    ///
    /// - [`DriverError::Handshake`]: `RSP` 无响应或格式不对。
    ///   设备身份未经验证时绞车不能动，调用方应终止进程。
    pub fn connect(
        transport: impl Transport + 'static,
        geometry: SpoolGeometry,
        options: MotorOptions,
    ) -> Result<Self, DriverError> {
        geometry.validate()?;

        let channel = CommandChannel::new(transport);
        channel.set_read_timeout(options.read_timeout)?;

        // SMI 等调试工具可能把设备留在回显模式
        channel.exchange("ECHO_OFF ")?;

        let lines = channel.exchange("RSP\r")?;
        let line = lines.first().map(String::as_str).unwrap_or("");
        let (sample_rate, version) = split_rate_version(line)
            .map_err(|_| DriverError::Handshake(format!("bad RSP response {line:?}")))?;
        let dialect = CommandDialect::from_version(&version);
        info!("Sample rate: {sample_rate}");
        info!("Firmware version: {version} ({dialect:?} dialect)");

        if dialect.has_brake_commands() {
            // 注意：BRKTRJ 在力矩模式下不会自动松闸，
            // 力矩移动前必须显式 BRKRLS
            channel.exchange("BRKTRJ ")?;
        }

        // 默认位置误差限太小，高速时会误触发
        channel.exchange("EL=-1 ")?;
        if let Ok(lines) = channel.exchange("REL\r") {
            debug!("Error limit now {:?}", lines.first());
        }

        let motor = Self {
            channel,
            state: Mutex::new(MotorState {
                firmware_version: version,
                dialect,
                sample_rate,
                power_fraction: 1.0,
            }),
            converter: UnitConverter::new(geometry, sample_rate),
            status_query: StatusQuery::new(dialect),
            default_accel: options.accel,
        };
        motor.set_max_power_fraction(options.max_power_fraction)?;
        motor.zero_position_reference()?;
        Ok(motor)
    }

    /// 单位换算器（几何 + 本会话采样率）
    pub fn converter(&self) -> &UnitConverter {
        &self.converter
    }

    /// 本会话的命令方言
    pub fn dialect(&self) -> CommandDialect {
        self.state.lock().dialect
    }

    /// 固件版本串
    pub fn firmware_version(&self) -> String {
        self.state.lock().firmware_version.clone()
    }

    /// 当前功率上限比例
    pub fn power_fraction(&self) -> f64 {
        self.state.lock().power_fraction
    }

    /// 会话状态快照（展示层用）
    pub fn state(&self) -> MotorState {
        self.state.lock().clone()
    }

    /// 默认轨迹加速度
    pub fn default_accel(&self) -> u32 {
        self.default_accel
    }

    // ============================================================
    // 读数查询
    // ============================================================

    /// 编码器位置（计数）
    pub fn read_position_counts(&self) -> Result<f64, DriverError> {
        let query = format!("{}\r", self.dialect().position_query());
        let lines = self.channel.exchange(&query)?;
        let line = lines.first().map(String::as_str).unwrap_or("");
        Ok(parse_float("position", line)?)
    }

    /// 已放出缆长（米 + 筒转数）
    pub fn read_cable_out(&self) -> Result<CableOut, DriverError> {
        let counts = self.read_position_counts()?;
        let cable = self.converter.cable_out(counts);
        if cable.meters.abs() > 0.01 {
            debug!("cable_out = {:.2} m / {:.2} rev", cable.meters, cable.revolutions);
        }
        Ok(cable)
    }

    /// 电机电流（UIA）
    pub fn read_current(&self) -> Result<f64, DriverError> {
        let (text, expected) = print_query(&["UIA"]);
        let lines = self.channel.exchange_n(&text, expected)?;
        let line = lines.first().map(String::as_str).unwrap_or("");
        Ok(parse_float("current", line)?)
    }

    /// 电机力矩（RTRQ）
    pub fn read_torque(&self) -> Result<f64, DriverError> {
        let lines = self.channel.exchange("RTRQ\r")?;
        let line = lines.first().map(String::as_str).unwrap_or("");
        Ok(parse_float("torque", line)?)
    }

    /// 设备时钟（毫秒）
    pub fn read_clock_ms(&self) -> Result<f64, DriverError> {
        let lines = self.channel.exchange("RCLK\r")?;
        let line = lines.first().map(String::as_str).unwrap_or("");
        Ok(parse_float("clock", line)?)
    }

    /// 批量状态采样：状态字、瞬时速度、电流、力矩、位置
    ///
    /// 控制循环每个周期调用一次；合并成单次交换把串口往返压到
    /// 最低。
    pub fn sample_status(&self) -> Result<StatusSample, DriverError> {
        let lines = self
            .channel
            .exchange_n(self.status_query.text(), self.status_query.expected_responses())?;
        Ok(self.status_query.parse(&lines)?)
    }

    // ============================================================
    // 运动命令
    // ============================================================

    /// 启动速度移动
    pub fn start_velocity_move(&self, mps: f64, accel: Option<u32>) -> Result<(), DriverError> {
        let vt = self.converter.velocity_mps_to_device(mps).round() as i64;
        info!("velocity move = {:.3} m/s (VT={vt})", mps);
        let accel = accel.unwrap_or(self.default_accel);
        self.channel
            .exchange(&velocity_move(self.dialect(), accel, vt))?;
        Ok(())
    }

    /// 启动位置（轨迹）移动，参数为设备单位
    ///
    /// 移动状态机在重发轨迹命令时需要和上次命令的 VT 做比较，
    /// 因此这一层不做单位换算。
    pub fn start_position_move(&self, pt: i64, vt: i64, accel: u32) -> Result<(), DriverError> {
        debug!("position move: PT={pt} VT={vt} accel={accel}");
        self.channel
            .exchange(&position_move(self.dialect(), accel, vt, pt))?;
        Ok(())
    }

    /// 启动力矩移动
    ///
    /// 调用方必须先松闸（[`Motor::release_brake`]）。命令逐条
    /// 发送：力矩模式的建立对批量发送很敏感。
    pub fn start_force_move(&self, kg: f64) -> Result<(), DriverError> {
        // MT 立即生效，先停到已知状态
        self.stop_motor()?;
        let dialect = self.dialect();
        let torque = self.converter.force_kg_to_device(kg, dialect).round() as i64;
        info!("force move with torque {torque} ({kg:.2} kg)");
        for cmd in torque_move(dialect, torque) {
            self.channel.exchange(&cmd)?;
        }
        Ok(())
    }

    /// 零力矩命令（保持力矩模式，线可自由进出）
    pub fn issue_zero_torque(&self) -> Result<(), DriverError> {
        self.channel.exchange(&zero_torque())?;
        Ok(())
    }

    /// 停止电机并回到安全的零速度模式
    pub fn stop_motor(&self) -> Result<(), DriverError> {
        info!("Stopping motor");
        self.channel.exchange(&stop_command())?;
        self.channel.exchange(&safe_velocity_mode(self.dialect()))?;
        Ok(())
    }

    /// 释放刹车（仅 5.x 方言有此命令）
    pub fn release_brake(&self) -> Result<(), DriverError> {
        if self.dialect().has_brake_commands() {
            self.channel.exchange(&bare_command("BRKRLS"))?;
        }
        Ok(())
    }

    /// 抱闸（交回轨迹管理）
    pub fn engage_brake(&self) -> Result<(), DriverError> {
        if self.dialect().has_brake_commands() {
            self.channel.exchange(&bare_command("BRKTRJ"))?;
        }
        Ok(())
    }

    /// 把当前位置定义为零点
    pub fn zero_position_reference(&self) -> Result<(), DriverError> {
        self.channel.exchange(&set_register("O", 0))?;
        Ok(())
    }

    /// 设置功率上限比例（映射到 `AMPS`，满量程 1023）
    pub fn set_max_power_fraction(&self, fraction: f64) -> Result<(), DriverError> {
        let fraction = fraction.clamp(0.0, 1.0);
        let amps = (fraction * 1023.0) as i64;
        self.channel.exchange(&set_register("AMPS", amps))?;
        self.state.lock().power_fraction = fraction;
        Ok(())
    }

    // ============================================================
    // 诊断
    // ============================================================

    /// 状态字诊断报告
    ///
    /// `sw` 为 `None` 时现场查询。逐标志位写入日志；位置错误标志
    /// 置位时追加误差寄存器读数。非致命：报告本身失败只记警告。
    pub fn status_report(&self, sw: Option<StatusWord>) -> Result<Vec<String>, DriverError> {
        let sw = match sw {
            Some(sw) => sw,
            None => self.sample_status()?.status,
        };
        let mut lines = sw.report_lines();
        if sw.pos_fault() {
            match self.channel.exchange_n("PRINT(EA,#13) ", 1) {
                Ok(resp) => {
                    lines.push(format!(
                        "actual position error: {}",
                        resp.first().map(String::as_str).unwrap_or("?")
                    ));
                }
                Err(e) => warn!("failed to read position error register: {e}"),
            }
        }
        for line in &lines {
            info!("status | {line}");
        }
        Ok(lines)
    }
}
