//! 响应行解析
//!
//! 设备响应是单独成行的十进制数（整数或浮点数）。解析失败返回
//! [`ProtocolError::BadNumber`]，由调用方决定是向上传播还是在
//! 轮询路径上就地降级。

use crate::ProtocolError;

/// 解析整数响应行
pub fn parse_int(field: &'static str, line: &str) -> Result<i64, ProtocolError> {
    let trimmed = line.trim();
    trimmed.parse::<i64>().map_err(|_| ProtocolError::BadNumber {
        field,
        text: line.to_string(),
    })
}

/// 解析浮点响应行
///
/// 设备对部分寄存器返回整数文本，对另一部分返回浮点文本，
/// 统一按 f64 解析。
pub fn parse_float(field: &'static str, line: &str) -> Result<f64, ProtocolError> {
    let trimmed = line.trim();
    trimmed.parse::<f64>().map_err(|_| ProtocolError::BadNumber {
        field,
        text: line.to_string(),
    })
}

/// 拆分握手响应 `rate/version`
///
/// `RSP` 返回形如 `8000/5.0.3.61` 的斜杠分隔串：采样率和固件
/// 版本。任何偏离此格式的内容都视为握手失败。
pub fn split_rate_version(line: &str) -> Result<(u32, String), ProtocolError> {
    let trimmed = line.trim();
    let (rate, version) = trimmed
        .split_once('/')
        .ok_or_else(|| ProtocolError::MalformedHandshake(line.to_string()))?;
    let rate = rate
        .parse::<u32>()
        .map_err(|_| ProtocolError::MalformedHandshake(line.to_string()))?;
    if version.is_empty() {
        return Err(ProtocolError::MalformedHandshake(line.to_string()));
    }
    Ok((rate, version.to_string()))
}
