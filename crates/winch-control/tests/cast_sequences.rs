//! 投放序列的端到端测试（模拟器）
//!
//! 机械尺寸缩小到厘米级，让整条序列在秒级跑完。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use winch_client::{Calibration, OperationError, WinchController};
use winch_control::{CastParams, CastSequencer, CastTrigger, FixedDepth};
use winch_driver::{Motor, MotorOptions};
use winch_protocol::SpoolGeometry;
use winch_serial::{LoadModel, SimHandle, SimMotor};

/// 缩小尺寸的测试序列：臂 2 cm、笼 3 cm、退出 5 cm
fn test_params() -> CastParams {
    CastParams {
        arm_length: 0.02,
        cage_length: 0.03,
        ease_distance: 0.05,
        free_idle_ms: 1000,
        ..Default::default()
    }
}

fn sim_sequencer() -> (CastSequencer, SimHandle) {
    let sim = SimMotor::new();
    let handle = sim.handle();
    let motor = Motor::connect(sim, SpoolGeometry::default(), MotorOptions::default()).unwrap();
    let calibration = Calibration {
        tick_interval_ms: 10,
        ..Default::default()
    };
    let controller = WinchController::new(motor, calibration);
    (CastSequencer::new(controller, test_params()), handle)
}

#[test]
fn test_cast_out_deploys_with_slack_monitoring() {
    let (seq, handle) = sim_sequencer();
    handle.set_load(LoadModel::ConstantPull {
        device_velocity: 400_000.0,
    });

    seq.cast_out(0.1).unwrap();

    // 单次移动到 深度 + 臂长 + 笼长
    let cable = seq
        .controller()
        .cable_out(Duration::from_secs(10))
        .unwrap();
    let expected = seq.deploy_length(0.1);
    assert!(
        (cable.meters - expected).abs() < 0.01,
        "expected {expected:.2} m, got {:.3} m",
        cable.meters
    );

    // 松弛监测开启：布放从自由轮（力矩序列）起步
    let tokens = handle.tokens();
    assert!(tokens.contains(&"MT".to_string()));
    assert!(tokens.contains(&"BRKRLS".to_string()));

    // 结束后动作标签清空
    assert_eq!(seq.controller().current_action(), None);
}

#[test]
fn test_cast_in_returns_to_zero() {
    let (seq, handle) = sim_sequencer();
    let conv = *seq.controller().motor().converter();

    // 从 0.3 m 开始回收
    handle.set_position_counts(conv.position_m_to_device(0.3));
    seq.cast_in().unwrap();

    let cable = seq
        .controller()
        .cable_out(Duration::from_secs(10))
        .unwrap();
    assert!(
        cable.meters.abs() < 0.01,
        "expected rest position, got {:.3} m",
        cable.meters
    );

    // 三段剖面：途中至少重发过一次不同 VT 的轨迹命令
    let writes = handle.writes();
    let vts: std::collections::HashSet<&str> = writes
        .iter()
        .filter(|w| w.contains("MP"))
        .filter_map(|w| w.split_whitespace().find(|t| t.starts_with("VT=")))
        .collect();
    assert!(vts.len() >= 2, "expected profile speed changes, got {vts:?}");

    // 回收不做松弛监测：没有自由轮力矩序列
    assert!(!handle.tokens().contains(&"BRKRLS".to_string()));
}

#[test]
fn test_full_cast_roundtrip() {
    let (seq, handle) = sim_sequencer();
    handle.set_load(LoadModel::ConstantPull {
        device_velocity: 400_000.0,
    });

    seq.cast(0.1, false).unwrap();

    let cable = seq
        .controller()
        .cable_out(Duration::from_secs(10))
        .unwrap();
    assert!(cable.meters.abs() < 0.01, "cast should end retrieved");
    assert_eq!(seq.controller().current_action(), None);
}

#[test]
fn test_reset_by_force_rezeroes_at_stop() {
    let (seq, handle) = sim_sequencer();
    let conv = *seq.controller().motor().converter();

    // 从 0.2 m 开始，硬止点在 -0.05 m 对应的计数处
    handle.set_position_counts(conv.position_m_to_device(0.2));
    handle.set_hard_stop_min(Some(conv.position_m_to_device(-0.05)));

    seq.reset_by_force().unwrap();

    let tokens = handle.tokens();
    // 反向恒力收缆（9 kg × 880 单位/kg）
    assert!(tokens.contains(&"BRKRLS".to_string()));
    assert!(tokens.contains(&"T=-7920".to_string()));
    // 堵转后停车抱闸
    assert!(tokens.contains(&"X".to_string()));
    assert!(tokens.contains(&"BRKTRJ".to_string()));
    // 退出止点后把位置参考清零
    assert_eq!(tokens.last().unwrap(), "O=0");

    // 零点已重定义：当前位置就是 0
    let cable = seq
        .controller()
        .cable_out(Duration::ZERO)
        .unwrap();
    assert!(
        cable.meters.abs() < 0.01,
        "expected re-zeroed position, got {:.3} m",
        cable.meters
    );
}

#[test]
fn test_towyo_recovers_instrument_on_cleanup_abort() {
    let (seq, handle) = sim_sequencer();
    handle.set_load(LoadModel::ConstantPull {
        device_velocity: 400_000.0,
    });

    // 500 ms 后请求允许回收的取消
    let ctrl = Arc::clone(seq.controller());
    let aborter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(500));
        ctrl.abort(true);
    });

    let telemetry = FixedDepth(0.2);
    let result = seq.towyo(&telemetry, 1.0);
    aborter.join().unwrap();

    // 取消原样向上传播
    assert!(matches!(
        result,
        Err(OperationError::Aborted(signal)) if signal.cleanup
    ));

    // 但回收已经先执行：仪器包收回到全收位置
    let cable = seq.controller().cable_out(Duration::ZERO).unwrap();
    assert!(
        cable.meters < 0.02,
        "expected instrument retrieved after cleanup abort, got {:.3} m",
        cable.meters
    );
}

/// 脚本化触发：第一次放行，之后请求急停
struct OneShotTrigger {
    controller: Arc<WinchController>,
    fired: AtomicUsize,
    in_progress: AtomicUsize,
    complete: AtomicUsize,
}

impl CastTrigger for OneShotTrigger {
    fn wait_for_signal(
        &self,
        poll: &mut dyn FnMut() -> Result<(), OperationError>,
    ) -> Result<(), OperationError> {
        poll()?;
        if self.fired.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(())
        } else {
            // 第二轮：请求停止并等轮询点消费信号
            self.controller.abort(false);
            loop {
                poll()?;
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    fn signal_in_progress(&self) {
        self.in_progress.fetch_add(1, Ordering::SeqCst);
    }

    fn signal_complete(&self) {
        self.complete.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_triggered_cast_loop_runs_one_cast() {
    let (seq, handle) = sim_sequencer();
    handle.set_load(LoadModel::ConstantPull {
        device_velocity: 400_000.0,
    });

    let trigger = OneShotTrigger {
        controller: Arc::clone(seq.controller()),
        fired: AtomicUsize::new(0),
        in_progress: AtomicUsize::new(0),
        complete: AtomicUsize::new(0),
    };
    let telemetry = FixedDepth(0.05);

    let result = seq.run_triggered_casts(&trigger, &telemetry);
    assert!(matches!(result, Err(OperationError::Aborted(_))));

    // 恰好一整次投放：进行中/完成各回报一次
    assert_eq!(trigger.in_progress.load(Ordering::SeqCst), 1);
    assert_eq!(trigger.complete.load(Ordering::SeqCst), 1);
}
