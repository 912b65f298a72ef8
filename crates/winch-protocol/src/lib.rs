//! # Winch Protocol
//!
//! 智能伺服绞车控制器的行协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `command`: 命令文本构建与成帧规则
//! - `response`: 响应行解析（十进制数值）
//! - `status`: 16 位状态字解码
//! - `dialect`: 固件命令方言选择
//! - `spool`: 绕线筒几何模型
//! - `units`: 物理单位 ⇄ 设备单位换算
//!
//! ## 成帧规则
//!
//! 命令以 CR（`\r`）作为规范行结束符。命令文本中每出现一个 CR，
//! 设备就返回一行响应；以空格（而非行结束符）结尾的命令不产生响应。
//! `PRINT(...)` 查询通过参数表中的 `#13` 显式输出 CR，因此其响应
//! 数量由调用方显式给出，而不能通过计数结束符推断。

pub mod command;
pub mod dialect;
pub mod response;
pub mod spool;
pub mod status;
pub mod units;

// 重新导出常用类型
pub use command::{
    CARRIAGE_RETURN, StatusQuery, bare_command, expected_responses, normalize_terminators,
    position_move, print_query, safe_velocity_mode, set_register, stop_command, torque_move,
    velocity_move, zero_torque,
};
pub use dialect::CommandDialect;
pub use response::{parse_float, parse_int, split_rate_version};
pub use spool::{GeometryError, SpoolGeometry};
pub use status::{StatusSample, StatusWord};
pub use units::{CableOut, UnitConverter};

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 期望数值响应，但内容无法解析
    #[error("Bad numeric response for {field}: {text:?}")]
    BadNumber { field: &'static str, text: String },

    /// 响应行数不足（超时导致的空响应会触发此错误）
    #[error("Missing response for {field}: expected {expected} lines, got {got}")]
    MissingResponse {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    /// 握手字符串格式错误（应为 `rate/version`）
    #[error("Malformed handshake response: {0:?}")]
    MalformedHandshake(String),
}
