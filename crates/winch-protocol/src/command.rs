//! 命令文本构建与成帧规则
//!
//! 设备协议是自由文本：寄存器赋值（`NAME=value`）、裸关键字命令
//! （`G`、`X`、`ZS`）、以及带括号参数表的查询关键字
//! （`PRINT(UIA,#13)`）。本模块提供构建器和成帧计数工具，
//! 不做任何 I/O。
//!
//! # 响应计数
//!
//! - 以 `\r` 结尾的命令产生一行响应；
//! - 以空格结尾的命令不产生响应；
//! - `PRINT(...)` 中每个 `#13` 参数输出一个 CR，响应数量必须由
//!   调用方显式给出（见 [`StatusQuery`]）。

use crate::ProtocolError;
use crate::dialect::CommandDialect;
use crate::response::{parse_float, parse_int};
use crate::status::{StatusSample, StatusWord};
use std::fmt::Display;

/// 规范行结束符
pub const CARRIAGE_RETURN: char = '\r';

/// 将其他行结束约定规范化为 CR
///
/// 上层调用方可能用 `\n` 书写多行命令；设备只认 CR。
pub fn normalize_terminators(text: &str) -> String {
    text.replace('\n', "\r")
}

/// 统计命令文本（已规范化）所期望的响应行数
///
/// 每个 CR 对应一行响应。注意：不含 `PRINT(...,#13,...)` 产生的
/// 额外响应，那种情况调用方必须显式给出数量。
pub fn expected_responses(text: &str) -> usize {
    text.matches(CARRIAGE_RETURN).count()
}

/// 寄存器赋值命令（无响应，以空格结尾）
pub fn set_register(name: &str, value: impl Display) -> String {
    format!("{name}={value} ")
}

/// 裸关键字命令（无响应，以空格结尾）
pub fn bare_command(keyword: &str) -> String {
    format!("{keyword} ")
}

/// 带参数表的 PRINT 查询
///
/// 每个寄存器后跟 `#13`，设备为每个寄存器输出一行响应。
/// 返回命令文本和期望的响应行数。
pub fn print_query(registers: &[&str]) -> (String, usize) {
    let args = registers
        .iter()
        .map(|r| format!("{r},#13"))
        .collect::<Vec<_>>()
        .join(",");
    (format!("PRINT({args}) "), registers.len())
}

/// 停止命令
///
/// 单独的 `X` 只取消当前轨迹；调用方通常随后发送
/// [`safe_velocity_mode`] 把模式恢复到安全状态。
pub fn stop_command() -> String {
    bare_command("X")
}

/// 恢复到安全的零速度速度模式
///
/// 停止后设备可能仍处于力矩模式，重新进入 MV 模式并把 VT 归零，
/// 避免后续命令继承旧模式。
pub fn safe_velocity_mode(dialect: CommandDialect) -> String {
    format!("ZS MV {}=800 VT=0 G ", dialect.accel_register())
}

/// 位置（轨迹）移动命令
///
/// `ZS MP <accel> VT PT G`，加速度寄存器名随方言变化。
pub fn position_move(dialect: CommandDialect, accel: u32, vt: i64, pt: i64) -> String {
    format!(
        "ZS MP {}={accel} VT={vt} PT={pt} G ",
        dialect.accel_register()
    )
}

/// 速度移动命令
pub fn velocity_move(dialect: CommandDialect, accel: u32, vt: i64) -> String {
    format!("ZS MV {}={accel} VT={vt} G ", dialect.accel_register())
}

/// 力矩移动命令序列
///
/// 力矩模式的建立顺序随方言不同，旧固件要求先进入 MT 再设置
/// 力矩斜率，新固件在 `TS` 赋值后跟 `G` 才生效。逐条发送
/// （每条一次交换）比拼接成一条更可靠。
pub fn torque_move(dialect: CommandDialect, torque: i64) -> Vec<String> {
    match dialect {
        CommandDialect::Classic => vec![
            "MT ".to_string(),
            "TS=65536 ".to_string(),
            format!("T={torque} "),
        ],
        CommandDialect::Gen5 => vec![
            "ZS MT ".to_string(),
            format!("T={torque} "),
            "TS=250000 G ".to_string(),
        ],
    }
}

/// 零力矩命令（自由放线）
pub fn zero_torque() -> String {
    "MT T=0 G ".to_string()
}

/// 每个控制循环周期发出的批量状态查询
///
/// 一次交换返回：状态字、瞬时速度、电流、力矩、编码器位置。
/// 合并为单次往返能把每个周期的串口开销降到最低。
///
/// # Example
///
/// ```
/// use winch_protocol::{CommandDialect, StatusQuery};
///
/// let query = StatusQuery::new(CommandDialect::Gen5);
/// assert_eq!(query.expected_responses(), 5);
/// assert!(query.text().contains("RW(0)"));
/// ```
#[derive(Debug, Clone)]
pub struct StatusQuery {
    text: String,
    expected: usize,
}

impl StatusQuery {
    /// 构建批量状态查询
    pub fn new(dialect: CommandDialect) -> Self {
        // RW(0) 一行，PRINT(VA,#13,UIA,#13) 两行，RTRQ 一行，位置查询一行。
        // 响应数量（5）无法从 CR 计数推出，必须显式携带。
        let text = format!(
            "RW(0)\rPRINT(VA,#13,UIA,#13)\rRTRQ\r{}\r",
            dialect.position_query()
        );
        Self { text, expected: 5 }
    }

    /// 命令文本
    pub fn text(&self) -> &str {
        &self.text
    }

    /// 期望的响应行数
    pub fn expected_responses(&self) -> usize {
        self.expected
    }

    /// 把按序返回的响应行解析为一个状态采样
    pub fn parse(&self, lines: &[String]) -> Result<StatusSample, ProtocolError> {
        if lines.len() < self.expected {
            return Err(ProtocolError::MissingResponse {
                field: "status sample",
                expected: self.expected,
                got: lines.len(),
            });
        }
        Ok(StatusSample {
            status: StatusWord::from_raw(parse_int("status word", &lines[0])? as u16),
            velocity: parse_float("velocity", &lines[1])?,
            current: parse_float("current", &lines[2])?,
            torque: parse_float("torque", &lines[3])?,
            position: parse_float("position", &lines[4])?,
        })
    }
}
