//! 确定性设备模拟器
//!
//! 实现与真实电机控制器相同的行协议，用于桌面开发和测试。
//! 运动学按墙钟积分：`MV` 匀速、`MP` 向 `PT` 收敛并截停、
//! `MT` 零力矩时跟随外载模型（自由轮），非零力矩时以一阶惯性
//! 逼近力矩对应的速度，遇到硬止点后速度归零（机械堵转）。
//!
//! # 命令分发
//!
//! 关键字经由静态标记变体表解析，表在构造时做唯一性校验；
//! 未知关键字只记一条警告，不会让模拟器崩溃。
//!
//! # 测试注入
//!
//! [`SimHandle`] 允许测试脚本覆盖力矩/电流/状态字读数、配置外载
//! 模型，并读取完整的命令日志（用于"未发出任何设备命令"和
//! "先停车后抱闸"之类的断言）。
//!
//! 模拟器按 5.x 固件行为建模：力矩模式由 `G` 激活。旧方言的
//! 命令文本由协议层测试覆盖，不经过这里。

use crate::{Transport, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use winch_protocol::status::BENIGN_STOP;

/// 轨迹进行中的状态字（ready + trajectory + 两条硬件使能）
const IN_TRAJECTORY_STATUS: u16 = 0x0C05;

/// 自由轮阶段的外载模型
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadModel {
    /// 无外载：零力矩时保持静止
    Static,
    /// 恒定外拉：零力矩时以给定设备速度（VT 量纲）放线
    ConstantPull { device_velocity: f64 },
    /// 线性增速外拉：速度从零按给定速率增长到上限
    RampPull {
        accel_per_s: f64,
        max_device_velocity: f64,
    },
}

/// 电机工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimMode {
    Idle,
    Velocity,
    Position,
    Torque,
}

/// 命令关键字的标记变体表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimCommand {
    Rsp,
    EchoOff,
    Go,
    Stop,
    ZeroStatus,
    ModeVelocity,
    ModePosition,
    ModeTorque,
    BrakeRelease,
    BrakeManaged,
    ReadPosition,
    ReadTorque,
    ReadErrorLimit,
    ReadClock,
    ReadStatusWord,
}

/// 关键字 → 处理变体
///
/// `RP` 与 `RPA` 共用一个变体：两代固件的位置查询。
const KEYWORDS: &[(&str, SimCommand)] = &[
    ("RSP", SimCommand::Rsp),
    ("ECHO_OFF", SimCommand::EchoOff),
    ("G", SimCommand::Go),
    ("X", SimCommand::Stop),
    ("ZS", SimCommand::ZeroStatus),
    ("MV", SimCommand::ModeVelocity),
    ("MP", SimCommand::ModePosition),
    ("MT", SimCommand::ModeTorque),
    ("BRKRLS", SimCommand::BrakeRelease),
    ("BRKTRJ", SimCommand::BrakeManaged),
    ("RPA", SimCommand::ReadPosition),
    ("RP", SimCommand::ReadPosition),
    ("RTRQ", SimCommand::ReadTorque),
    ("REL", SimCommand::ReadErrorLimit),
    ("RCLK", SimCommand::ReadClock),
    ("RW(0)", SimCommand::ReadStatusWord),
];

fn lookup(keyword: &str) -> Option<SimCommand> {
    KEYWORDS
        .iter()
        .find(|(k, _)| *k == keyword)
        .map(|(_, cmd)| *cmd)
}

struct SimState {
    // 时基
    started: Instant,
    last_update: Instant,

    // 输出缓冲与日志
    out: VecDeque<u8>,
    writes: Vec<String>,
    tokens: Vec<String>,

    // 协议寄存器
    vt: f64,
    pt: f64,
    torque: f64,
    torque_slope: f64,
    accel: f64,
    error_limit: f64,
    amps: f64,

    // 机构状态
    mode: SimMode,
    active: bool,
    brake_released: bool,
    echo_off: bool,
    position: f64,
    vel_vt: f64,

    // 外载与机械止点
    load: LoadModel,
    hard_stop_min: Option<f64>,
    torque_velocity_gain: f64,
    torque_lag_s: f64,

    // 测试注入
    torque_override: Option<f64>,
    current_override: Option<f64>,
    status_override: Option<u16>,

    // 设备身份
    sample_rate: u32,
    version: String,
}

impl SimState {
    fn new(sample_rate: u32, version: &str) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_update: now,
            out: VecDeque::new(),
            writes: Vec::new(),
            tokens: Vec::new(),
            vt: 0.0,
            pt: 0.0,
            torque: 0.0,
            torque_slope: 0.0,
            accel: 100.0,
            error_limit: 100.0,
            amps: 1023.0,
            mode: SimMode::Idle,
            active: false,
            brake_released: false,
            echo_off: false,
            position: 0.0,
            vel_vt: 0.0,
            load: LoadModel::Static,
            hard_stop_min: None,
            torque_velocity_gain: 50.0,
            torque_lag_s: 0.2,
            torque_override: None,
            current_override: None,
            status_override: None,
            sample_rate,
            version: version.to_string(),
        }
    }

    /// 把上次更新以来的运动积分进位置
    fn integrate(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        if dt <= 0.0 {
            return;
        }

        let counts_per_sec = |vt: f64, srate: u32| vt * srate as f64 / 65536.0;

        match (self.mode, self.active) {
            (SimMode::Velocity, true) => {
                self.vel_vt = self.vt;
                self.position += dt * counts_per_sec(self.vel_vt, self.sample_rate);
            }
            (SimMode::Position, true) => {
                let dir = if self.pt >= self.position { 1.0 } else { -1.0 };
                self.vel_vt = dir * self.vt.abs();
                let next = self.position + dt * counts_per_sec(self.vel_vt, self.sample_rate);
                // 越过目标即截停
                if (dir > 0.0 && next >= self.pt) || (dir < 0.0 && next <= self.pt) {
                    self.position = self.pt;
                    self.active = false;
                    self.vel_vt = 0.0;
                } else {
                    self.position = next;
                }
            }
            (SimMode::Torque, true) => {
                if !self.brake_released {
                    self.vel_vt = 0.0;
                } else if self.torque == 0.0 {
                    // 自由轮：跟随外载模型
                    self.vel_vt = match self.load {
                        LoadModel::Static => 0.0,
                        LoadModel::ConstantPull { device_velocity } => device_velocity,
                        LoadModel::RampPull {
                            accel_per_s,
                            max_device_velocity,
                        } => {
                            let next = self.vel_vt + accel_per_s * dt;
                            next.clamp(-max_device_velocity.abs(), max_device_velocity.abs())
                        }
                    };
                    self.position += dt * counts_per_sec(self.vel_vt, self.sample_rate);
                } else {
                    // 力矩驱动：一阶惯性逼近目标速度。
                    // TS 是设备的力矩斜率，折算进时间常数
                    let target = self.torque * self.torque_velocity_gain;
                    let lag = self.torque_lag_s
                        * (250_000.0 / self.torque_slope.max(1.0)).clamp(0.1, 10.0);
                    let alpha = (dt / lag).min(1.0);
                    self.vel_vt += (target - self.vel_vt) * alpha;
                    let next = self.position + dt * counts_per_sec(self.vel_vt, self.sample_rate);
                    match self.hard_stop_min {
                        // 机械堵转：位置钉死，速度归零
                        Some(stop) if next <= stop => {
                            self.position = stop;
                            self.vel_vt = 0.0;
                        }
                        _ => self.position = next,
                    }
                }
            }
            _ => {
                self.vel_vt = 0.0;
            }
        }
    }

    fn respond(&mut self, text: &str) {
        self.out.extend(text.bytes());
        self.out.push_back(b'\r');
    }

    fn status_word(&self) -> u16 {
        if let Some(raw) = self.status_override {
            return raw;
        }
        match (self.mode, self.active) {
            (SimMode::Velocity, true) | (SimMode::Position, true) => IN_TRAJECTORY_STATUS,
            _ => BENIGN_STOP,
        }
    }

    fn reported_torque(&self) -> f64 {
        if let Some(t) = self.torque_override {
            return t;
        }
        match (self.mode, self.active) {
            (SimMode::Torque, true) => self.torque,
            (SimMode::Velocity, true) | (SimMode::Position, true) => 480.0,
            _ => 0.0,
        }
    }

    fn reported_current(&self) -> f64 {
        if let Some(c) = self.current_override {
            return c;
        }
        match (self.mode, self.active) {
            (SimMode::Velocity, true) | (SimMode::Position, true) => 210.0,
            _ => 100.0,
        }
    }

    fn handle_keyword(&mut self, cmd: SimCommand) {
        match cmd {
            SimCommand::Rsp => {
                let line = format!("{}/{}", self.sample_rate, self.version);
                self.respond(&line);
            }
            SimCommand::EchoOff => self.echo_off = true,
            SimCommand::Go => {
                self.integrate();
                if self.mode == SimMode::Position && self.pt == self.position {
                    // 空移动：设备直接认为到位
                    debug!("sim: empty MP, not activating");
                    self.active = false;
                } else {
                    self.active = true;
                }
            }
            SimCommand::Stop => {
                self.integrate();
                self.active = false;
                self.vel_vt = 0.0;
            }
            SimCommand::ZeroStatus => {}
            SimCommand::ModeVelocity => self.mode = SimMode::Velocity,
            SimCommand::ModePosition => self.mode = SimMode::Position,
            SimCommand::ModeTorque => self.mode = SimMode::Torque,
            SimCommand::BrakeRelease => self.brake_released = true,
            SimCommand::BrakeManaged => self.brake_released = false,
            SimCommand::ReadPosition => {
                self.integrate();
                let line = format!("{}", self.position.round() as i64);
                self.respond(&line);
            }
            SimCommand::ReadTorque => {
                self.integrate();
                let line = format!("{}", self.reported_torque().round() as i64);
                self.respond(&line);
            }
            SimCommand::ReadErrorLimit => {
                let line = format!("{}", self.error_limit.round() as i64);
                self.respond(&line);
            }
            SimCommand::ReadClock => {
                let ms = self.started.elapsed().as_millis();
                let line = format!("{ms}");
                self.respond(&line);
            }
            SimCommand::ReadStatusWord => {
                self.integrate();
                let line = format!("{}", self.status_word());
                self.respond(&line);
            }
        }
    }

    fn handle_register(&mut self, name: &str, value: &str) {
        let Ok(value) = value.parse::<f64>() else {
            warn!("sim: unparsable register value {name}={value}");
            return;
        };
        match name {
            "VT" => self.vt = value,
            "PT" => {
                self.integrate();
                self.pt = value;
            }
            "T" => self.torque = value,
            "TS" => self.torque_slope = value,
            "ADT" | "AT" => self.accel = value,
            "EL" => self.error_limit = value,
            "AMPS" => self.amps = value,
            "O" => {
                // 重定义位置参考
                self.integrate();
                self.position = value;
            }
            other => warn!("sim: unknown register {other}"),
        }
    }

    fn handle_print(&mut self, args_text: &str) {
        self.integrate();
        for arg in args_text.split(',') {
            match arg {
                "#13" => self.out.push_back(b'\r'),
                "UIA" => {
                    let line = format!("{}", self.reported_current().round() as i64);
                    self.out.extend(line.bytes());
                }
                "VA" => {
                    // 设备报告的 VA 带经验性的 2 倍量纲
                    let line = format!("{}", (2.0 * self.vel_vt).round() as i64);
                    self.out.extend(line.bytes());
                }
                "TRQ" => {
                    let line = format!("{}", self.reported_torque().round() as i64);
                    self.out.extend(line.bytes());
                }
                "EA" => {
                    self.out.extend(b"0");
                }
                other => warn!("sim: unknown PRINT argument {other}"),
            }
        }
    }

    fn process_token(&mut self, token: &str) {
        self.tokens.push(token.to_string());
        if let Some(args) = token
            .strip_prefix("PRINT(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            self.handle_print(args);
        } else if let Some(cmd) = lookup(token) {
            self.handle_keyword(cmd);
        } else if let Some((name, value)) = token.split_once('=') {
            self.handle_register(name, value);
        } else {
            warn!("sim: unknown command token {token:?}");
        }
    }
}

/// 模拟电机
///
/// 实现 [`Transport`]；与 [`SimHandle`] 共享内部状态。
pub struct SimMotor {
    state: Arc<Mutex<SimState>>,
}

impl SimMotor {
    /// 默认身份：8000 采样率，5.0.3.61 固件
    pub fn new() -> Self {
        Self::with_identity(8000, "5.0.3.61")
    }

    /// 指定采样率与固件版本（用于旧方言握手测试）
    pub fn with_identity(sample_rate: u32, version: &str) -> Self {
        debug_assert!(
            {
                let mut keys: Vec<&str> = KEYWORDS.iter().map(|(k, _)| *k).collect();
                keys.sort_unstable();
                keys.windows(2).all(|w| w[0] != w[1])
            },
            "duplicate keyword in sim command table"
        );
        Self {
            state: Arc::new(Mutex::new(SimState::new(sample_rate, version))),
        }
    }

    /// 获取测试/编排句柄
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimMotor {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let text = String::from_utf8_lossy(bytes).into_owned();
        let mut state = self.state.lock();
        state.writes.push(text.clone());
        // 命令通道保证每次写出的文本以空格或 CR 收尾，
        // 因此一次写入里的 token 都是完整的
        for token in text.split([' ', '\r']).filter(|t| !t.is_empty()) {
            state.process_token(token);
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        // 输出缓冲为空时表现为超时（设备静默），不阻塞
        Ok(self.state.lock().out.pop_front())
    }

    fn set_read_timeout(&mut self, _timeout: std::time::Duration) -> Result<(), TransportError> {
        Ok(())
    }
}

/// 模拟器编排句柄
///
/// Clone 轻量（Arc 指针）。所有方法都可与持有 [`SimMotor`] 的
/// 通道线程并发调用。
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// 配置自由轮外载模型
    pub fn set_load(&self, load: LoadModel) {
        self.state.lock().load = load;
    }

    /// 覆盖力矩读数（`None` 恢复模型值）
    pub fn set_torque_readout(&self, torque: Option<f64>) {
        self.state.lock().torque_override = torque;
    }

    /// 覆盖电流读数
    pub fn set_current_readout(&self, current: Option<f64>) {
        self.state.lock().current_override = current;
    }

    /// 覆盖状态字
    pub fn set_status_override(&self, raw: Option<u16>) {
        self.state.lock().status_override = raw;
    }

    /// 设置机械硬止点（计数；向内收缆时在此堵转）
    pub fn set_hard_stop_min(&self, counts: Option<f64>) {
        self.state.lock().hard_stop_min = counts;
    }

    /// 当前编码器位置（计数）
    pub fn position_counts(&self) -> f64 {
        let mut state = self.state.lock();
        state.integrate();
        state.position
    }

    /// 直接设定编码器位置（测试布置场景用）
    pub fn set_position_counts(&self, counts: f64) {
        let mut state = self.state.lock();
        state.integrate();
        state.position = counts;
    }

    /// 完整 token 日志
    pub fn tokens(&self) -> Vec<String> {
        self.state.lock().tokens.clone()
    }

    /// 原始写入日志（每次 `write_all` 一条）
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    /// 写入次数
    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    /// 清空命令日志（握手产生的命令通常先清掉再断言）
    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.writes.clear();
        state.tokens.clear();
    }

    /// 刹车是否已释放
    pub fn brake_released(&self) -> bool {
        self.state.lock().brake_released
    }

    /// 回显是否已关闭（握手应首先关回显）
    pub fn echo_off(&self) -> bool {
        self.state.lock().echo_off
    }

    /// 当前功率上限寄存器值（AMPS）
    pub fn power_limit(&self) -> f64 {
        self.state.lock().amps
    }

    /// 当前加速度寄存器值（ADT/AT）
    pub fn accel(&self) -> f64 {
        self.state.lock().accel
    }
}
