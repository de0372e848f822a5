//! Robot control engine
//!
//! [`Robot`] owns the background task-cycle machinery: the shared state
//! snapshot, the action registry and resolver, direct motion bookkeeping,
//! and the transport. [`RobotHandle`] is the cheap, cloneable face of the
//! same engine — actions receive one at registration, and any thread may
//! hold one to read state or issue direct motion commands. `Robot` derefs to
//! `RobotHandle`, so the whole handle API is available on the owner too.
//!
//! # Thread model
//!
//! Two background threads while running:
//!
//! 1. **Reader thread**: bounded-timeout receives from the transport,
//!    handing decoded packets to the engine through a channel.
//! 2. **Cycle thread** (or the caller's thread in [`Robot::run`]): the
//!    fixed-period loop — drain packets, update the snapshot, run sensor
//!    interpretation hooks, resolve actions, reflect commands, sleep.
//!
//! All shared state lives behind mutexes with short critical sections;
//! accessor methods lock internally, so external callers never touch a lock
//! directly. Callbacks and hooks are invoked with the respective registry
//! locked — do not register further callbacks from inside one. Likewise the
//! action registry is locked for the whole resolution pass, so an action's
//! `fire` must not call `add_action`/`remove_action`; state accessors and
//! direct motion calls on the handle are fine.

pub(crate) mod cycle;
pub(crate) mod direct;
pub(crate) mod reflect;

use crate::action::{Action, DesiredMotion};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::resolver::{ActionRegistry, PriorityResolver};
use crate::state::{RobotState, TripOdometer};
use crate::transport::PacketTransport;
use crate::types::{Pose, norm_degrees, sub_degrees};
use direct::{DirectMotion, RotCommand, TransCommand};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Connection state machine of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No contact with the device
    Disconnected,
    /// Waiting for the first state packet
    Connecting,
    /// First contact made; in the stabilizing grace period
    Stabilizing,
    /// Fully connected, commands flowing
    Connected,
}

/// Insertion position for hooks and callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPos {
    /// Run before everything currently registered
    First,
    /// Run after everything currently registered
    Last,
}

/// Sensor interpretation hook: post-processes the snapshot each cycle,
/// before action resolution
pub type SensorInterpFn = Box<dyn FnMut(&mut RobotState) + Send>;

/// Handler for unrecognized telemetry packets; returns false if the payload
/// is malformed
pub type PacketHandlerFn = Box<dyn FnMut(&[u8], &mut RobotState) -> bool + Send>;

/// Connection lifecycle callback
pub type ConnectionFn = Box<dyn FnMut() + Send>;

struct NamedHook {
    name: String,
    func: SensorInterpFn,
}

#[derive(Default)]
pub(crate) struct ConnectionCallbacks {
    connect: Vec<ConnectionFn>,
    disconnect: Vec<ConnectionFn>,
    stabilizing: Vec<ConnectionFn>,
}

pub(crate) struct RobotInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) state: Mutex<RobotState>,
    pub(crate) actions: Mutex<ActionRegistry>,
    pub(crate) resolver: Mutex<PriorityResolver>,
    pub(crate) last_resolved: Mutex<DesiredMotion>,
    hooks: Mutex<Vec<NamedHook>>,
    pub(crate) packet_handlers: Mutex<HashMap<u8, PacketHandlerFn>>,
    pub(crate) callbacks: Mutex<ConnectionCallbacks>,
    pub(crate) direct: Mutex<DirectMotion>,
    pub(crate) transport: Mutex<Box<dyn PacketTransport>>,
    pub(crate) conn: Mutex<ConnectionState>,
    pub(crate) conn_cond: Condvar,
    pub(crate) stop_requested: AtomicBool,
    running: AtomicBool,
    pub(crate) run_exited: Mutex<bool>,
    pub(crate) run_cond: Condvar,
}

impl RobotInner {
    /// Transition the connection state, notify waiters, and fire the
    /// matching callback list
    pub(crate) fn set_connection_state(&self, new: ConnectionState) {
        let old = {
            let mut conn = self.conn.lock();
            let old = *conn;
            *conn = new;
            old
        };
        if old == new {
            return;
        }
        log::info!("Connection state: {:?} -> {:?}", old, new);
        self.conn_cond.notify_all();

        let mut callbacks = self.callbacks.lock();
        let list = match new {
            ConnectionState::Connected => &mut callbacks.connect,
            ConnectionState::Stabilizing => &mut callbacks.stabilizing,
            ConnectionState::Disconnected => &mut callbacks.disconnect,
            ConnectionState::Connecting => return,
        };
        for cb in list.iter_mut() {
            cb();
        }
    }

    pub(crate) fn run_sensor_interp_hooks(&self) {
        let mut hooks = self.hooks.lock();
        if hooks.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        for hook in hooks.iter_mut() {
            (hook.func)(&mut *state);
        }
    }
}

/// The robot control engine
///
/// Owns the background threads; dropping the `Robot` stops them and with
/// them the registered actions. Derefs to [`RobotHandle`] for the full
/// state/registration/direct-motion API.
pub struct Robot {
    inner: Arc<RobotInner>,
    handle: RobotHandle,
    cycle_handle: Option<JoinHandle<()>>,
    reader_handle: Option<JoinHandle<()>>,
}

impl Robot {
    /// Create an engine over the given transport
    ///
    /// The transport is assumed already opened; the engine starts in
    /// [`ConnectionState::Disconnected`] until [`run`](Robot::run) or
    /// [`run_async`](Robot::run_async) is called.
    pub fn new(config: RuntimeConfig, transport: impl PacketTransport + 'static) -> Result<Self> {
        config.validate()?;
        let state = RobotState::new(config.sonar_slots, config.battery_average_window);
        let inner = Arc::new(RobotInner {
            config,
            state: Mutex::new(state),
            actions: Mutex::new(ActionRegistry::new()),
            resolver: Mutex::new(PriorityResolver::new()),
            last_resolved: Mutex::new(DesiredMotion::new()),
            hooks: Mutex::new(Vec::new()),
            packet_handlers: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(ConnectionCallbacks::default()),
            direct: Mutex::new(DirectMotion::default()),
            transport: Mutex::new(Box::new(transport)),
            conn: Mutex::new(ConnectionState::Disconnected),
            conn_cond: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
            run_exited: Mutex::new(true),
            run_cond: Condvar::new(),
        });
        let handle = RobotHandle {
            inner: Arc::clone(&inner),
        };
        Ok(Self {
            inner,
            handle,
            cycle_handle: None,
            reader_handle: None,
        })
    }

    /// A cloneable handle to this engine
    pub fn handle(&self) -> RobotHandle {
        self.handle.clone()
    }

    /// Start the reader and cycle threads and return immediately
    pub fn run_async(&mut self) -> Result<()> {
        let (tx, rx) = self.start_common()?;

        let reader_inner = Arc::clone(&self.inner);
        self.reader_handle = Some(
            std::thread::Builder::new()
                .name("robot-reader".to_string())
                .spawn(move || cycle::reader_loop(reader_inner, tx))
                .map_err(|e| Error::Other(format!("Failed to spawn reader thread: {}", e)))?,
        );

        let cycle_inner = Arc::clone(&self.inner);
        self.cycle_handle = Some(
            std::thread::Builder::new()
                .name("robot-cycle".to_string())
                .spawn(move || cycle::cycle_loop(cycle_inner, rx))
                .map_err(|e| Error::Other(format!("Failed to spawn cycle thread: {}", e)))?,
        );

        log::info!("Robot engine started");
        Ok(())
    }

    /// Run the cycle loop on the calling thread, blocking until stopped
    ///
    /// The reader thread still runs in the background. Another thread holding
    /// a [`RobotHandle`] can end the loop with
    /// [`request_stop`](RobotHandle::request_stop).
    pub fn run(&mut self) -> Result<()> {
        let (tx, rx) = self.start_common()?;

        let reader_inner = Arc::clone(&self.inner);
        self.reader_handle = Some(
            std::thread::Builder::new()
                .name("robot-reader".to_string())
                .spawn(move || cycle::reader_loop(reader_inner, tx))
                .map_err(|e| Error::Other(format!("Failed to spawn reader thread: {}", e)))?,
        );

        cycle::cycle_loop(Arc::clone(&self.inner), rx);

        if let Some(handle) = self.reader_handle.take() {
            handle.join().map_err(|_| Error::ThreadPanic("robot-reader"))?;
        }
        self.inner.running.store(false, Ordering::Release);
        Ok(())
    }

    fn start_common(
        &mut self,
    ) -> Result<(
        crossbeam_channel::Sender<crate::packet::TelemetryPacket>,
        crossbeam_channel::Receiver<crate::packet::TelemetryPacket>,
    )> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }
        self.inner.stop_requested.store(false, Ordering::Release);
        *self.inner.run_exited.lock() = false;
        self.inner.set_connection_state(ConnectionState::Connecting);
        Ok(crossbeam_channel::unbounded())
    }

    /// Stop the engine: request stop and join both threads
    pub fn stop_run(&mut self) {
        self.inner.stop_requested.store(true, Ordering::Release);
        if let Some(handle) = self.cycle_handle.take()
            && handle.join().is_err()
        {
            log::error!("Cycle thread panicked during shutdown");
        }
        if let Some(handle) = self.reader_handle.take()
            && handle.join().is_err()
        {
            log::error!("Reader thread panicked during shutdown");
        }
        self.inner.running.store(false, Ordering::Release);
        log::info!("Robot engine stopped");
    }

    /// True while the engine loop is running
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

impl std::ops::Deref for Robot {
    type Target = RobotHandle;

    fn deref(&self) -> &RobotHandle {
        &self.handle
    }
}

impl Drop for Robot {
    fn drop(&mut self) {
        // Remaining actions are dropped with the registry.
        self.stop_run();
        self.inner.actions.lock().clear();
    }
}

/// Cheap cloneable handle to a [`Robot`]
///
/// Non-owning with respect to the engine's lifecycle: holding a handle keeps
/// the shared state alive but never the background threads.
#[derive(Clone)]
pub struct RobotHandle {
    inner: Arc<RobotInner>,
}

impl RobotHandle {
    // ------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------

    /// Corrected global pose
    pub fn pose(&self) -> Pose {
        self.inner.state.lock().pose
    }

    /// Raw dead-reckoned encoder pose
    pub fn encoder_pose(&self) -> Pose {
        self.inner.state.lock().encoder_pose
    }

    /// Translational velocity (mm/s)
    pub fn vel(&self) -> f64 {
        self.inner.state.lock().vel
    }

    /// Rotational velocity (deg/s)
    pub fn rot_vel(&self) -> f64 {
        self.inner.state.lock().rot_vel
    }

    /// Lateral velocity (mm/s)
    pub fn lat_vel(&self) -> f64 {
        self.inner.state.lock().lat_vel
    }

    /// Smoothed battery voltage
    pub fn battery_voltage(&self) -> f64 {
        self.inner.state.lock().battery_voltage()
    }

    /// Instantaneous battery voltage from the latest packet
    pub fn battery_voltage_now(&self) -> f64 {
        self.inner.state.lock().battery_volts
    }

    /// True if any stall bit is set
    pub fn is_stalled(&self) -> bool {
        self.inner.state.lock().is_stalled()
    }

    /// True if any bumper bit is set
    pub fn is_bumped(&self) -> bool {
        self.inner.state.lock().is_bumped()
    }

    /// True if the charger is attached and charging
    pub fn is_charging(&self) -> bool {
        self.inner.state.lock().charging
    }

    /// Range of a sonar slot in mm, None if invalid or never read
    pub fn sonar_range(&self, index: usize) -> Option<f64> {
        self.inner.state.lock().sonar_range(index)
    }

    /// Run a closure against the locked state snapshot
    ///
    /// For reads that need several fields coherently. Keep the closure
    /// short; the engine cannot apply packets while the lock is held.
    pub fn with_state<R>(&self, f: impl FnOnce(&RobotState) -> R) -> R {
        f(&*self.inner.state.lock())
    }

    /// Trip odometer totals
    pub fn odometer(&self) -> TripOdometer {
        self.inner.state.lock().odometer
    }

    /// Reset the trip odometer
    pub fn reset_trip_odometer(&self) {
        self.inner.state.lock().reset_trip_odometer();
    }

    /// Count of state packets applied since startup
    pub fn packets_received(&self) -> u64 {
        self.inner.state.lock().packets_received
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.conn.lock()
    }

    /// True when fully connected
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// The resolver's output from the most recent cycle, for diagnostics
    pub fn last_resolved(&self) -> DesiredMotion {
        *self.inner.last_resolved.lock()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register an action at the given priority (higher fires first)
    ///
    /// The action receives a handle to this engine via
    /// [`Action::attach`]. Returns false if an action with the same name is
    /// already registered at that priority.
    pub fn add_action(&self, mut action: Box<dyn Action>, priority: i32) -> bool {
        action.attach(self.clone());
        self.inner.actions.lock().add(action, priority)
    }

    /// Remove the first action with the given name and return it
    pub fn remove_action(&self, name: &str) -> Option<Box<dyn Action>> {
        self.inner.actions.lock().remove(name)
    }

    /// Deactivate the named action; returns false if not found
    pub fn deactivate_action(&self, name: &str) -> bool {
        let mut actions = self.inner.actions.lock();
        match actions.find_mut(name) {
            Some(action) => {
                action.deactivate();
                true
            }
            None => false,
        }
    }

    /// Activate the named action; returns false if not found
    pub fn activate_action(&self, name: &str) -> bool {
        let mut actions = self.inner.actions.lock();
        match actions.find_mut(name) {
            Some(action) => {
                action.activate();
                true
            }
            None => false,
        }
    }

    /// Registered (priority, name) pairs in firing order
    pub fn action_firing_order(&self) -> Vec<(i32, String)> {
        self.inner.actions.lock().firing_order()
    }

    /// Register a sensor interpretation hook
    ///
    /// Hooks run every cycle after packet application and before action
    /// resolution, in list order. Returns false on a duplicate name.
    pub fn add_sensor_interp_hook(
        &self,
        name: &str,
        position: ListPos,
        func: SensorInterpFn,
    ) -> bool {
        let mut hooks = self.inner.hooks.lock();
        if hooks.iter().any(|h| h.name == name) {
            log::warn!("Rejecting duplicate sensor interp hook '{}'", name);
            return false;
        }
        let hook = NamedHook {
            name: name.to_string(),
            func,
        };
        match position {
            ListPos::First => hooks.insert(0, hook),
            ListPos::Last => hooks.push(hook),
        }
        true
    }

    /// Remove a sensor interpretation hook by name
    pub fn remove_sensor_interp_hook(&self, name: &str) -> bool {
        let mut hooks = self.inner.hooks.lock();
        let before = hooks.len();
        hooks.retain(|h| h.name != name);
        hooks.len() != before
    }

    /// Register a handler for an unrecognized telemetry packet type
    ///
    /// Returns false if the id already has a handler.
    pub fn add_packet_handler(&self, id: u8, handler: PacketHandlerFn) -> bool {
        use std::collections::hash_map::Entry;
        match self.inner.packet_handlers.lock().entry(id) {
            Entry::Occupied(_) => {
                log::warn!("Rejecting duplicate packet handler for id 0x{:02X}", id);
                false
            }
            Entry::Vacant(v) => {
                v.insert(handler);
                true
            }
        }
    }

    /// Register a callback fired when the engine becomes fully connected
    pub fn add_connect_callback(&self, position: ListPos, func: ConnectionFn) {
        push_callback(&mut self.inner.callbacks.lock().connect, position, func);
    }

    /// Register a callback fired when the connection is lost or closed
    pub fn add_disconnect_callback(&self, position: ListPos, func: ConnectionFn) {
        push_callback(&mut self.inner.callbacks.lock().disconnect, position, func);
    }

    /// Register a callback fired on first contact, at the start of the
    /// stabilizing period
    pub fn add_stabilizing_callback(&self, position: ListPos, func: ConnectionFn) {
        push_callback(&mut self.inner.callbacks.lock().stabilizing, position, func);
    }

    // ------------------------------------------------------------------
    // Direct motion
    // ------------------------------------------------------------------

    /// Set a translational velocity directly, overriding actions on the
    /// translation channel for the precedence window
    pub fn set_velocity(&self, mm_per_sec: f64) {
        self.inner
            .direct
            .lock()
            .set_trans(TransCommand::Velocity(mm_per_sec), Instant::now());
    }

    /// Set a rotational velocity directly
    pub fn set_rot_vel(&self, deg_per_sec: f64) {
        self.inner
            .direct
            .lock()
            .set_rot(RotCommand::RotVel(deg_per_sec), Instant::now());
    }

    /// Set an absolute heading directly
    pub fn set_heading(&self, deg: f64) {
        self.inner
            .direct
            .lock()
            .set_rot(RotCommand::Heading(norm_degrees(deg)), Instant::now());
    }

    /// Turn by a relative heading delta; resolved to an absolute heading at
    /// call time
    pub fn set_delta_heading(&self, delta_deg: f64) {
        let heading = self.inner.state.lock().pose.heading;
        self.inner.direct.lock().set_rot(
            RotCommand::Heading(norm_degrees(heading + delta_deg)),
            Instant::now(),
        );
    }

    /// Set a lateral velocity directly (holonomic bases only)
    pub fn set_lat_velocity(&self, mm_per_sec: f64) {
        self.inner.direct.lock().set_lat(mm_per_sec, Instant::now());
    }

    /// Command a device-profiled move of `mm` millimeters (negative =
    /// backward)
    pub fn move_distance(&self, mm: f64) {
        let start = self.inner.state.lock().pose;
        let mut direct = self.inner.direct.lock();
        direct.set_trans(TransCommand::MoveDistance(mm), Instant::now());
        direct.set_move_goal(start, mm);
    }

    /// Stop both motion channels, overriding actions for the precedence
    /// window
    pub fn stop(&self) {
        self.inner.direct.lock().stop(Instant::now());
    }

    /// Hand control back to actions immediately on every channel
    pub fn clear_direct_motion(&self) {
        self.inner.direct.lock().clear();
    }

    /// True if any channel is currently under direct motion override
    pub fn is_direct_motion_active(&self) -> bool {
        self.inner
            .direct
            .lock()
            .any_active(Instant::now(), self.inner.config.direct_precedence())
    }

    /// True once the last commanded move is within `tolerance_mm` of its
    /// target (or when no move was commanded)
    ///
    /// Threshold based: physical actuation never reaches a setpoint exactly.
    pub fn is_move_done(&self, tolerance_mm: f64) -> bool {
        let goal = match self.inner.direct.lock().move_goal() {
            Some(goal) => goal,
            None => return true,
        };
        let pose = self.inner.state.lock().pose;
        goal.start.distance_to(&pose) >= goal.distance.abs() - tolerance_mm
    }

    /// True once the heading is within `tolerance_deg` of the last commanded
    /// heading (or when no heading was commanded)
    pub fn is_heading_done(&self, tolerance_deg: f64) -> bool {
        let goal = match self.inner.direct.lock().heading_goal() {
            Some(goal) => goal,
            None => return true,
        };
        let heading = self.inner.state.lock().pose.heading;
        sub_degrees(heading, goal).abs() <= tolerance_deg
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Ask the engine loop to exit; checked at the top of each cycle
    pub fn request_stop(&self) {
        self.inner.stop_requested.store(true, Ordering::Release);
    }

    /// Explicitly drop the connection: fires disconnect callbacks and
    /// suppresses motion output until the device is heard from again
    pub fn disconnect(&self) {
        self.inner.set_connection_state(ConnectionState::Disconnected);
    }

    /// Block until fully connected or the timeout elapses; returns whether
    /// the engine is connected
    pub fn wait_for_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut conn = self.inner.conn.lock();
        while *conn != ConnectionState::Connected {
            if self
                .inner
                .conn_cond
                .wait_until(&mut conn, deadline)
                .timed_out()
            {
                return *conn == ConnectionState::Connected;
            }
        }
        true
    }

    /// Block until the engine loop exits or the timeout elapses; returns
    /// whether it exited
    pub fn wait_for_run_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut exited = self.inner.run_exited.lock();
        while !*exited {
            if self
                .inner
                .run_cond
                .wait_until(&mut exited, deadline)
                .timed_out()
            {
                return *exited;
            }
        }
        true
    }
}

fn push_callback(list: &mut Vec<ConnectionFn>, position: ListPos, func: ConnectionFn) {
    match position {
        ListPos::First => list.insert(0, func),
        ListPos::Last => list.push(func),
    }
}

#[cfg(test)]
impl RobotHandle {
    /// Test-only mutable access to the state snapshot
    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut RobotState) -> R) -> R {
        f(&mut *self.inner.state.lock())
    }
}
