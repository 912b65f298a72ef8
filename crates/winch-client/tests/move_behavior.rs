//! 移动状态机的端到端行为测试
//!
//! 全部跑在确定性模拟器上：方向守卫、自由轮/伺服切换、空转
//! 放弃、松弛检测、忙拒绝、取消清理。

use std::sync::mpsc;
use std::time::{Duration, Instant};
use winch_client::{
    Calibration, DirectionConstraint, MoveRequest, OperationError, StartError, WinchController,
};
use winch_driver::{Motor, MotorOptions};
use winch_protocol::SpoolGeometry;
use winch_serial::{LoadModel, SimHandle, SimMotor};

fn sim_controller() -> (std::sync::Arc<WinchController>, SimHandle) {
    let sim = SimMotor::new();
    let handle = sim.handle();
    let motor = Motor::connect(sim, SpoolGeometry::default(), MotorOptions::default()).unwrap();
    let calibration = Calibration {
        tick_interval_ms: 10,
        ..Default::default()
    };
    (WinchController::new(motor, calibration), handle)
}

/// 等待命令日志满足条件（带超时的轮询）
fn wait_for(handle: &SimHandle, timeout: Duration, pred: impl Fn(&[String]) -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred(&handle.tokens()) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_direction_guard_is_noop_with_zero_commands() {
    let (ctrl, handle) = sim_controller();
    let conv = *ctrl.motor().converter();

    // 放到 0.5 m，预热位置缓存
    handle.set_position_counts(conv.position_m_to_device(0.5));
    ctrl.cable_out(Duration::ZERO).unwrap();
    handle.clear_log();

    // 目标在当前位置后面，但只允许向外放线：无操作
    let request = MoveRequest::to(0.2)
        .direction(DirectionConstraint::OutOnly)
        .monitor_slack();
    ctrl.move_cable(&request).unwrap();

    assert_eq!(handle.write_count(), 0, "no-op move must issue zero commands");
}

#[test]
fn test_move_to_current_position_is_noop() {
    let (ctrl, handle) = sim_controller();
    let conv = *ctrl.motor().converter();

    handle.set_position_counts(conv.position_m_to_device(1.0));
    ctrl.cable_out(Duration::ZERO).unwrap();
    handle.clear_log();

    // 目标就是当前位置，方向约束与运动相抵：幂等
    let request = MoveRequest::to(1.0).direction(DirectionConstraint::InOnly);
    ctrl.move_cable(&request).unwrap();
    assert_eq!(handle.write_count(), 0);

    let request = MoveRequest::to(1.0).direction(DirectionConstraint::OutOnly);
    ctrl.move_cable(&request).unwrap();
    assert_eq!(handle.write_count(), 0);
}

#[test]
fn test_freewheel_give_up_at_idle_timeout() {
    let (ctrl, handle) = sim_controller();
    // 无外载：线永远张不起来
    handle.set_load(LoadModel::Static);

    let max_idle = Duration::from_millis(300);
    let request = MoveRequest::to(5.0).monitor_slack().max_idle(max_idle);

    let started = Instant::now();
    ctrl.move_cable(&request).unwrap();
    let elapsed = started.elapsed();

    // 正好在空转上限处放弃：不早于上限，不晚于上限加两三个周期
    assert!(
        elapsed >= max_idle,
        "gave up too early: {elapsed:?} < {max_idle:?}"
    );
    assert!(
        elapsed < max_idle + Duration::from_millis(250),
        "gave up too late: {elapsed:?}"
    );

    // 放弃路径也要停车抱闸
    let tokens = handle.tokens();
    assert!(tokens.contains(&"X".to_string()));
    assert!(tokens.contains(&"BRKTRJ".to_string()));
}

#[test]
fn test_slack_move_freewheels_then_servos_to_target() {
    let (ctrl, handle) = sim_controller();
    // 外载把线拉到目标速度的 25% 以上（0.25 m/s 的默认目标）
    handle.set_load(LoadModel::ConstantPull {
        device_velocity: 400_000.0,
    });

    let request = MoveRequest::to(0.3)
        .monitor_slack()
        .max_idle(Duration::from_secs(2));
    ctrl.move_cable(&request).unwrap();

    // 确实经过了伺服阶段（下发过 MP 轨迹命令）
    assert!(handle.tokens().contains(&"MP".to_string()));

    // 到位（缓存读数来自最后一个周期的批量采样）
    let cable = ctrl.cable_out(Duration::from_secs(10)).unwrap();
    assert!(
        cable.meters >= 0.28,
        "expected to reach ~0.3 m, got {:.3} m",
        cable.meters
    );

    // 结束后停车抱闸
    let tokens = handle.tokens();
    assert!(tokens.contains(&"X".to_string()));
    assert!(tokens.contains(&"BRKTRJ".to_string()));
}

#[test]
fn test_servo_slack_detection_reverts_to_freewheel() {
    let (ctrl, handle) = sim_controller();
    handle.set_load(LoadModel::ConstantPull {
        device_velocity: 400_000.0,
    });

    let (tx, rx) = mpsc::channel();
    let request = MoveRequest::to(0.8)
        .monitor_slack()
        .max_idle(Duration::from_millis(400));
    ctrl.clone().move_cable_background(
        request,
        Some(Box::new(move |result| {
            let _ = tx.send(result);
        })),
    )
    .unwrap();

    // 等状态机切入伺服
    assert!(wait_for(&handle, Duration::from_secs(2), |tokens| {
        tokens.contains(&"MP".to_string())
    }));

    // 注入松弛症状：电流超阈值，力矩超速度相关阈值
    handle.set_current_readout(Some(400.0));
    handle.set_torque_readout(Some(100_000.0));

    // 状态机应发出零力矩命令退回自由轮。
    // 自由轮入口本身带一次 T=0，所以看第二次出现
    assert!(
        wait_for(&handle, Duration::from_secs(2), |tokens| {
            tokens.iter().filter(|t| *t == "T=0").count() >= 2
        }),
        "expected a second zero-torque command after slack detection"
    );

    // 力矩读数不归零：自由轮等不到真自由轮，空转超时后正常结束
    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    result.unwrap();
}

#[test]
fn test_busy_refusal_leaves_running_move_alone() {
    let (ctrl, handle) = sim_controller();

    let (tx, rx) = mpsc::channel();
    // 很远的目标：移动会跑很久
    ctrl.clone().move_cable_background(
        MoveRequest::to(50.0),
        Some(Box::new(move |result| {
            let _ = tx.send(result);
        })),
    )
    .unwrap();

    assert!(wait_for(&handle, Duration::from_secs(2), |tokens| {
        tokens.contains(&"MP".to_string())
    }));

    // 第二个操作被拒绝，且不生成线程、不碰第一个操作
    let second = ctrl.clone().move_cable_background(MoveRequest::to(1.0), None);
    assert_eq!(second.unwrap_err(), StartError::Busy("move to position"));
    assert!(ctrl.supervisor().is_busy());
    assert_eq!(ctrl.current_action(), Some("move to position"));

    // 收尾：取消第一个操作。钉住"轨迹进行中"状态字，
    // 让取消信号一定先于轨迹结束被观察到
    handle.set_status_override(Some(0x0C05));
    ctrl.abort(false);
    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(result, Err(OperationError::Aborted(_))));
}

#[test]
fn test_abort_during_servo_stops_and_brakes() {
    let (ctrl, handle) = sim_controller();

    let (tx, rx) = mpsc::channel();
    // 纯伺服移动（不开松弛监测）
    ctrl.clone().move_cable_background(
        MoveRequest::to(10.0),
        Some(Box::new(move |result| {
            let _ = tx.send(result);
        })),
    )
    .unwrap();

    assert!(wait_for(&handle, Duration::from_secs(2), |tokens| {
        tokens.contains(&"MP".to_string())
    }));
    handle.clear_log();

    // 钉住"轨迹进行中"状态字：快路径停车不会让状态机先看到
    // 轨迹结束，取消信号一定在轮询点被消费
    handle.set_status_override(Some(0x0C05));
    ctrl.abort(false);
    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    match result {
        Err(OperationError::Aborted(signal)) => assert!(!signal.cleanup),
        other => panic!("expected abort, got {other:?}"),
    }

    // 取消后：先停车（X）再抱闸（BRKTRJ），顺序不能反
    let tokens = handle.tokens();
    let stop_at = tokens.iter().position(|t| t == "X");
    let brake_at = tokens.iter().rposition(|t| t == "BRKTRJ");
    assert!(stop_at.is_some(), "no stop command after abort: {tokens:?}");
    assert!(brake_at.is_some(), "no brake command after abort: {tokens:?}");
    assert!(stop_at.unwrap() < brake_at.unwrap());

    // 槽位复位：后续操作不会被误判为已取消
    while ctrl.supervisor().is_busy() {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(ctrl.current_action(), None);
    assert!(ctrl.poll().is_ok());
}

#[test]
fn test_abort_during_freewheel_stops_and_brakes() {
    let (ctrl, handle) = sim_controller();
    handle.set_load(LoadModel::Static);

    let (tx, rx) = mpsc::channel();
    let request = MoveRequest::to(5.0)
        .monitor_slack()
        .max_idle(Duration::from_secs(30));
    ctrl.clone().move_cable_background(
        request,
        Some(Box::new(move |result| {
            let _ = tx.send(result);
        })),
    )
    .unwrap();

    // 等进入自由轮（入口的力矩序列出现）
    assert!(wait_for(&handle, Duration::from_secs(2), |tokens| {
        tokens.contains(&"MT".to_string())
    }));
    handle.clear_log();

    ctrl.abort(true);
    let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    match result {
        Err(OperationError::Aborted(signal)) => assert!(signal.cleanup),
        other => panic!("expected abort, got {other:?}"),
    }

    let tokens = handle.tokens();
    assert!(tokens.contains(&"X".to_string()));
    assert!(tokens.contains(&"BRKTRJ".to_string()));
}

#[test]
fn test_position_dependent_velocity_reissues_trajectory() {
    let (ctrl, handle) = sim_controller();

    // 0.15 m 之前慢速，之后快速：经过分界点时应重发轨迹命令
    let profile = winch_client::VelocityPolicy::profile(|m| if m < 0.15 { 0.1 } else { 0.3 });
    let request = MoveRequest::to(0.3).velocity_profile(profile);
    ctrl.move_cable(&request).unwrap();

    // 至少两条不同 VT 的 MP 命令
    let writes = handle.writes();
    let mp_cmds: Vec<&String> = writes.iter().filter(|w| w.contains("MP")).collect();
    assert!(
        mp_cmds.len() >= 2,
        "expected trajectory reissue, got {mp_cmds:?}"
    );
    let vts: std::collections::HashSet<&str> = mp_cmds
        .iter()
        .filter_map(|w| w.split_whitespace().find(|t| t.starts_with("VT=")))
        .collect();
    assert!(vts.len() >= 2, "expected differing VT values, got {vts:?}");
}
