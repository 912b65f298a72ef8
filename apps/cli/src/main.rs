//! # Winch CLI
//!
//! 绞车命令行工具：投放、布放、回收、复位、状态与监视。
//!
//! ```bash
//! # 完整投放到 15 m（布放 + 回收）
//! winch-cli cast --depth 15
//!
//! # 桌面调试：内置模拟器，不需要硬件
//! winch-cli --simulate cast --depth 2
//!
//! # 周期打印缓存读数
//! winch-cli monitor --interval 0.5
//! ```
//!
//! Ctrl-C 一次 = 允许回收的取消（序列会先把仪器包收回来）；
//! 第二次 = 急停，立即停车，不再有任何运动。

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;
use winch_client::WinchController;
use winch_control::{CastSequencer, WinchConfig};
use winch_driver::Motor;
use winch_serial::{SerialPortTransport, SimMotor};

/// Winch CLI - 绞车命令行工具
#[derive(Parser, Debug)]
#[command(name = "winch-cli")]
#[command(about = "Command-line interface for the instrument winch", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 ~/.config/winch/winch.toml，不存在则用内置默认）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 串口路径覆盖
    #[arg(long, global = true)]
    port: Option<String>,

    /// 使用内置模拟器（无硬件桌面调试）
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 完整投放：布放 + 回收，可选复位
    Cast {
        /// 投放深度（m）；缺省用配置里的深度覆盖值
        #[arg(long)]
        depth: Option<f64>,
        /// 回收后做力模式复位
        #[arg(long)]
        reset: bool,
    },

    /// 布放到指定深度
    Out {
        /// 投放深度（m）
        #[arg(long)]
        depth: f64,
    },

    /// 回收到全收位置
    In,

    /// 力模式复位（收到硬止点并重新定义零点）
    Reset,

    /// 打印状态字诊断报告
    Status,

    /// 周期打印缓存读数
    Monitor {
        /// 刷新间隔（秒）
        #[arg(long, default_value_t = 1.0)]
        interval: f64,
    },

    /// 把当前位置定义为零点
    Zero,

    /// 立即停车抱闸
    Stop,
}

/// Ctrl-C 升级标志：monitor 等非操作循环也要能退出
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let controller = connect(&cli, &config)?;
    let sequencer = CastSequencer::new(Arc::clone(&controller), config.cast.clone());

    install_abort_handler(Arc::clone(&controller))?;

    match cli.command {
        Commands::Cast { depth, reset } => {
            let depth = resolve_depth(depth, &config)?;
            sequencer.cast(depth, reset)?;
            info!("cast complete");
        }
        Commands::Out { depth } => {
            sequencer.cast_out(depth)?;
            info!("deployed to {:.2} m of cable", sequencer.deploy_length(depth));
        }
        Commands::In => {
            sequencer.cast_in()?;
            info!("instrument retrieved");
        }
        Commands::Reset => {
            sequencer.reset_by_force()?;
            info!("position reference reset");
        }
        Commands::Status => {
            for line in controller.status_report()? {
                println!("{line}");
            }
        }
        Commands::Monitor { interval } => {
            run_monitor(&controller, Duration::from_secs_f64(interval))?;
        }
        Commands::Zero => {
            controller.zero_here()?;
            info!("current position is now the zero reference");
        }
        Commands::Stop => {
            controller.stop()?;
            info!("motor stopped, brake engaged");
        }
    }
    Ok(())
}

/// 加载配置：显式路径必须存在；默认路径不存在时用内置默认值
fn load_config(cli: &Cli) -> Result<WinchConfig> {
    if let Some(path) = &cli.config {
        return WinchConfig::load(path);
    }
    let default_path = dirs::config_dir()
        .map(|dir| dir.join("winch").join("winch.toml"))
        .filter(|path| path.exists());
    match default_path {
        Some(path) => {
            info!("using config {}", path.display());
            WinchConfig::load(&path)
        }
        None => Ok(WinchConfig::default()),
    }
}

/// 建立设备会话
///
/// 打开串口或握手失败都是致命的：没有经过验证的设备身份，
/// 进程直接退出并给出诊断。
fn connect(cli: &Cli, config: &WinchConfig) -> Result<Arc<WinchController>> {
    let motor = if cli.simulate {
        info!("using built-in motor simulator");
        Motor::connect(SimMotor::new(), config.geometry, config.motor_options())
            .context("simulator handshake failed")?
    } else {
        let port = cli.port.as_deref().unwrap_or(&config.port);
        let transport = SerialPortTransport::open(
            port,
            config.baud_rate,
            Duration::from_millis(config.read_timeout_ms),
        )
        .with_context(|| format!("opening winch serial port {port}"))?;
        Motor::connect(transport, config.geometry, config.motor_options())
            .with_context(|| format!("winch handshake failed on {port}"))?
    };
    Ok(WinchController::new(motor, config.calibration.clone()))
}

/// 投放深度：命令行参数优先，其次配置的深度覆盖
fn resolve_depth(arg: Option<f64>, config: &WinchConfig) -> Result<f64> {
    match arg.or(config.depth_override) {
        Some(depth) if depth > 0.0 => Ok(depth),
        Some(depth) => bail!("cast depth must be positive, got {depth}"),
        None => bail!("no cast depth: pass --depth or set depth_override in the config"),
    }
}

/// Ctrl-C：第一次允许回收的取消，第二次急停
fn install_abort_handler(controller: Arc<WinchController>) -> Result<()> {
    let presses = AtomicUsize::new(0);
    ctrlc::set_handler(move || {
        INTERRUPTED.store(true, Ordering::SeqCst);
        let count = presses.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            eprintln!("interrupt: aborting with cleanup allowed (Ctrl-C again for emergency stop)");
            controller.abort(true);
        } else {
            eprintln!("interrupt: emergency stop");
            controller.abort(false);
        }
    })
    .context("installing Ctrl-C handler")?;
    Ok(())
}

/// 周期打印缓存读数，Ctrl-C 退出
///
/// 单次解析失败只显示 `unknown`，不终止监视循环。
fn run_monitor(controller: &Arc<WinchController>, interval: Duration) -> Result<()> {
    fn fmt<T: std::fmt::Display>(value: Result<T, winch_client::OperationError>) -> String {
        match value {
            Ok(v) => format!("{v:.2}"),
            Err(e) => {
                tracing::warn!("monitor read failed: {e}");
                "unknown".to_string()
            }
        }
    }

    let max_age = interval / 2;
    while !INTERRUPTED.load(Ordering::SeqCst) {
        let cable = fmt(controller.cable_out(max_age).map(|c| c.meters));
        let current = fmt(controller.motor_current(max_age));
        let torque = fmt(controller.motor_torque(max_age));
        // 缆速只在移动中由控制循环更新，空闲时显示最近一次
        let speed = controller
            .monitor()
            .velocity
            .latest()
            .map(|s| format!("{:.2}", s.value))
            .unwrap_or_else(|| "-".to_string());
        let action = controller.current_action().unwrap_or("idle");
        println!(
            "cable {cable} m | speed {speed} m/s | current {current} | torque {torque} | action: {action}"
        );
        std::thread::sleep(interval);
    }
    Ok(())
}
