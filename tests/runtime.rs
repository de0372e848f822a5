//! End-to-end task-cycle scenarios over the mock transport

use sarathi::packet::{CommandPacket, StatusPacket, TelemetryPacket};
use sarathi::transport::MockTransport;
use sarathi::{
    Action, ConnectionState, DesiredMotion, ListPos, Pose, Robot, RobotHandle, RuntimeConfig,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        cycle_period_ms: 10,
        cycle_overrun_warn_ms: 100,
        connection_timeout_ms: 10_000,
        direct_precedence_ms: 200,
        stabilizing_ms: 0,
        command_refresh_ms: 10_000,
        ..Default::default()
    }
}

fn status_at(x: f64, y: f64, heading: f64) -> TelemetryPacket {
    TelemetryPacket::Status(StatusPacket {
        pose: Pose::new(x, y, heading),
        battery_volts: 12.0,
        ..Default::default()
    })
}

/// Poll until `cond` holds or the timeout elapses
fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Background thread injecting status packets at a fixed rate
struct Feeder {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Feeder {
    fn start(mock: MockTransport, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !thread_stop.load(Ordering::Relaxed) {
                mock.inject(status_at(0.0, 0.0, 0.0));
                thread::sleep(period);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Feeder {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Test action proposing a constant full-strength velocity
struct ConstVel {
    vel: f64,
}

impl Action for ConstVel {
    fn name(&self) -> &str {
        "const-vel"
    }
    fn fire(&mut self, _current: &DesiredMotion) -> Option<DesiredMotion> {
        let mut d = DesiredMotion::new();
        d.set_vel(self.vel, 1.0);
        Some(d)
    }
}

#[test]
fn test_connect_then_timeout_suppresses_motion() {
    init_logging();
    let mock = MockTransport::new();
    let config = RuntimeConfig {
        connection_timeout_ms: 150,
        ..fast_config()
    };
    let mut robot = Robot::new(config, mock.clone()).unwrap();
    robot.add_action(Box::new(ConstVel { vel: 200.0 }), 50);
    robot.run_async().unwrap();

    let mut feeder = Feeder::start(mock.clone(), Duration::from_millis(20));
    assert!(robot.wait_for_connected(Duration::from_secs(2)));

    // Action output flows while connected
    assert!(wait_until(Duration::from_secs(1), || {
        mock.sent_commands()
            .contains(&CommandPacket::SetVelocity { mm_per_sec: 200.0 })
    }));

    // Packets stop arriving: the engine must declare the connection lost
    feeder.halt();
    assert!(wait_until(Duration::from_secs(2), || {
        robot.connection_state() == ConnectionState::Disconnected
    }));

    // Fail safe: even an explicit direct command goes nowhere now
    let before = mock.sent_count();
    robot.set_velocity(555.0);
    thread::sleep(Duration::from_millis(300));
    assert_eq!(mock.sent_count(), before);
    assert!(
        !mock
            .sent_commands()
            .contains(&CommandPacket::SetVelocity { mm_per_sec: 555.0 })
    );

    // The device coming back re-enters through stabilizing and the engine
    // re-sends its setpoints
    mock.clear_sent();
    let _feeder = Feeder::start(mock.clone(), Duration::from_millis(20));
    assert!(wait_until(Duration::from_secs(2), || robot.is_connected()));
    assert!(wait_until(Duration::from_secs(1), || {
        mock.sent_commands()
            .contains(&CommandPacket::SetVelocity { mm_per_sec: 200.0 })
    }));

    robot.stop_run();
}

#[test]
fn test_direct_motion_precedence_window() {
    init_logging();
    let mock = MockTransport::new();
    let mut robot = Robot::new(fast_config(), mock.clone()).unwrap();
    robot.add_action(Box::new(ConstVel { vel: 200.0 }), 50);
    robot.run_async().unwrap();

    mock.inject(status_at(0.0, 0.0, 0.0));
    assert!(robot.wait_for_connected(Duration::from_secs(2)));
    assert!(wait_until(Duration::from_secs(1), || {
        mock.sent_commands()
            .contains(&CommandPacket::SetVelocity { mm_per_sec: 200.0 })
    }));

    // Direct command overrides the full-strength action on the same channel
    robot.set_velocity(123.0);
    assert!(robot.is_direct_motion_active());
    assert!(wait_until(Duration::from_secs(1), || {
        mock.sent_commands()
            .contains(&CommandPacket::SetVelocity { mm_per_sec: 123.0 })
    }));

    // After the precedence window the action regains the channel
    let idx_override = mock
        .sent_commands()
        .iter()
        .position(|c| *c == CommandPacket::SetVelocity { mm_per_sec: 123.0 })
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        mock.sent_commands()
            .iter()
            .skip(idx_override + 1)
            .any(|c| *c == CommandPacket::SetVelocity { mm_per_sec: 200.0 })
    }));
    assert!(!robot.is_direct_motion_active());

    robot.stop_run();
}

#[test]
fn test_stabilizing_grace_period_and_callback_order() {
    init_logging();
    let mock = MockTransport::new();
    let config = RuntimeConfig {
        stabilizing_ms: 100,
        ..fast_config()
    };
    let mut robot = Robot::new(config, mock.clone()).unwrap();

    let events: Arc<std::sync::Mutex<Vec<&'static str>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));
    let ev = Arc::clone(&events);
    robot.add_stabilizing_callback(
        ListPos::Last,
        Box::new(move || ev.lock().unwrap().push("stabilizing")),
    );
    let ev = Arc::clone(&events);
    robot.add_connect_callback(
        ListPos::Last,
        Box::new(move || ev.lock().unwrap().push("connected")),
    );

    robot.run_async().unwrap();
    let _feeder = Feeder::start(mock.clone(), Duration::from_millis(20));

    assert!(wait_until(Duration::from_secs(1), || {
        robot.connection_state() != ConnectionState::Connecting
    }));
    // First contact enters stabilizing, not connected
    assert!(matches!(
        robot.connection_state(),
        ConnectionState::Stabilizing | ConnectionState::Connected
    ));

    assert!(robot.wait_for_connected(Duration::from_secs(2)));
    assert_eq!(*events.lock().unwrap(), vec!["stabilizing", "connected"]);

    robot.stop_run();
}

#[test]
fn test_sensor_interp_hook_runs_before_resolution() {
    init_logging();

    /// Fires only when the hook has marked the snapshot this cycle
    struct GatedAction {
        robot: Option<RobotHandle>,
    }

    impl Action for GatedAction {
        fn name(&self) -> &str {
            "gated"
        }
        fn attach(&mut self, robot: RobotHandle) {
            self.robot = Some(robot);
        }
        fn fire(&mut self, _current: &DesiredMotion) -> Option<DesiredMotion> {
            let robot = self.robot.as_ref()?;
            if robot.with_state(|s| s.digital_in) == 0x07 {
                let mut d = DesiredMotion::new();
                d.set_vel(300.0, 1.0);
                Some(d)
            } else {
                None
            }
        }
    }

    let mock = MockTransport::new();
    let mut robot = Robot::new(fast_config(), mock.clone()).unwrap();
    robot.add_action(Box::new(GatedAction { robot: None }), 50);
    assert!(robot.add_sensor_interp_hook(
        "mark",
        ListPos::Last,
        Box::new(|state| state.digital_in = 0x07),
    ));

    robot.run_async().unwrap();
    mock.inject(status_at(0.0, 0.0, 0.0));
    assert!(robot.wait_for_connected(Duration::from_secs(2)));

    // The action only proposes after the hook ran in the same cycle, so the
    // command proves the ordering
    assert!(wait_until(Duration::from_secs(1), || {
        mock.sent_commands()
            .contains(&CommandPacket::SetVelocity { mm_per_sec: 300.0 })
    }));

    robot.stop_run();
}

#[test]
fn test_custom_packet_handler_dispatch() {
    init_logging();
    let mock = MockTransport::new();
    let mut robot = Robot::new(fast_config(), mock.clone()).unwrap();
    assert!(robot.add_packet_handler(
        0x42,
        Box::new(|payload, state| {
            if payload.len() != 2 {
                return false;
            }
            state.digital_out = u16::from_le_bytes([payload[0], payload[1]]);
            true
        }),
    ));
    // Second handler for the same id is rejected
    assert!(!robot.add_packet_handler(0x42, Box::new(|_, _| true)));

    robot.run_async().unwrap();
    mock.inject(status_at(0.0, 0.0, 0.0));
    assert!(robot.wait_for_connected(Duration::from_secs(2)));

    mock.inject(TelemetryPacket::Other {
        id: 0x42,
        payload: vec![0x34, 0x12],
    });
    assert!(wait_until(Duration::from_secs(1), || {
        robot.with_state(|s| s.digital_out) == 0x1234
    }));

    // Malformed payload is rejected without killing the cycle
    mock.inject(TelemetryPacket::Other {
        id: 0x42,
        payload: vec![0xFF],
    });
    mock.inject(status_at(500.0, 0.0, 0.0));
    assert!(wait_until(Duration::from_secs(1), || {
        robot.pose().x == 500.0
    }));
    assert_eq!(robot.with_state(|s| s.digital_out), 0x1234);

    robot.stop_run();
}

#[test]
fn test_malformed_status_skipped() {
    init_logging();
    let mock = MockTransport::new();
    let mut robot = Robot::new(fast_config(), mock.clone()).unwrap();
    robot.run_async().unwrap();

    mock.inject(status_at(100.0, 0.0, 0.0));
    assert!(robot.wait_for_connected(Duration::from_secs(2)));
    assert!(wait_until(Duration::from_secs(1), || robot.pose().x == 100.0));

    let bad = StatusPacket {
        pose: Pose::new(999.0, 0.0, 0.0),
        vel: f64::NAN,
        ..Default::default()
    };
    mock.inject(TelemetryPacket::Status(bad));
    mock.inject(status_at(200.0, 0.0, 0.0));

    assert!(wait_until(Duration::from_secs(1), || robot.pose().x == 200.0));
    // The malformed pose never landed
    assert_eq!(robot.packets_received(), 2);

    robot.stop_run();
}

#[test]
fn test_request_stop_from_handle() {
    init_logging();
    let mock = MockTransport::new();
    let mut robot = Robot::new(fast_config(), mock.clone()).unwrap();
    robot.run_async().unwrap();

    let handle = robot.handle();
    handle.request_stop();
    assert!(handle.wait_for_run_exit(Duration::from_secs(2)));
    robot.stop_run();
    assert!(!robot.is_running());
}
