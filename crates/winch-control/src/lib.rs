//! # Winch Control
//!
//! 布放/回收序列
//!
//! 在运动控制器之上组合完整的投放工作流：
//!
//! - [`CastSequencer`]: 布放（`cast_out`）、回收（`cast_in`）、
//!   完整投放（`cast`）、力模式复位（`reset_by_force`）、拖曳
//!   （`towyo`）与硬件触发循环
//! - [`TelemetrySource`] / [`CastTrigger`]: 外部协作者接口 ——
//!   水深/船速遥测与投放触发信号线。核心只消费这两个接口，
//!   实现在进程装配层
//! - [`WinchConfig`]: TOML 配置（串口、几何、标定、投放参数）

pub mod config;
pub mod sequencer;
pub mod telemetry;
pub mod trigger;

pub use config::WinchConfig;
pub use sequencer::{CastParams, CastSequencer};
pub use telemetry::{FixedDepth, TelemetrySource};
pub use trigger::CastTrigger;
