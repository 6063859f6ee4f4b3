//! ViX stepper drive controller.
//!
//! Models one multi-axis ViX IM controller reachable over a serial line:
//! encodes the ASCII command protocol, tracks believed per-axis status, and
//! exposes the command surface used by the motion workers (start, stop,
//! go-home, jog, goto, per-axis stop).
//!
//! ## Position bookkeeping
//!
//! The hardware in this design offers no independent position query, so a
//! cached position is maintained by bookkeeping: `goto` sets it exactly after
//! a settled move, while `jog` advances it by an estimated ±5% of the axis
//! travel limit per command. The cache is a belief about hardware state, not
//! a guaranteed-accurate read.
//!
//! ## Blocking semantics
//!
//! Commands marked blocking wait for the axis to report not-moving/not-busy
//! before and after the write, polling the moving/busy bit pair at 10 ms
//! granularity with a bounded retry count (default ≈50 s). `Stop` is always
//! sent without waiting — an emergency stop must not queue behind a settle.

use crate::adapters::Adapter;
use crate::config::Settings;
use crate::error::{AppResult, DriveResult, TraverserError};
use log::debug;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Homing / bring-up creep velocity.
const SLOW_VEL: f64 = 0.5;

/// Settle-wait bound: 5000 polls at 10 ms is the ≈50 s default.
const DEFAULT_MAX_POLLS: u32 = 5000;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Jog direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Move mode selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveMode {
    Continuous,
    Incremental,
}

/// One protocol message, before framing with an axis id.
#[derive(Clone, Debug, PartialEq)]
pub enum AxisCommand {
    SetVelocity(f64),
    SetAcceleration(f64),
    SetDeceleration(f64),
    SetDirection(Direction),
    SetMoveMode(MoveMode),
    SetDistance(i64),
    Go,
    Stop,
    PowerOn,
    PowerOff,
    Kill,
    ZeroPosition,
}

impl AxisCommand {
    /// Encodes the message as `<axis-id><opcode>[params]`.
    pub fn encode(&self, axis: u8) -> String {
        let op = match self {
            AxisCommand::SetVelocity(v) => format!("V{v}"),
            AxisCommand::SetAcceleration(a) => format!("AA{a}"),
            AxisCommand::SetDeceleration(d) => format!("AD{d}"),
            AxisCommand::SetDirection(Direction::Forward) => "H+".to_string(),
            AxisCommand::SetDirection(Direction::Reverse) => "H-".to_string(),
            AxisCommand::SetMoveMode(MoveMode::Continuous) => "MC".to_string(),
            AxisCommand::SetMoveMode(MoveMode::Incremental) => "MI".to_string(),
            AxisCommand::SetDistance(d) => format!("D{d}"),
            AxisCommand::Go => "G".to_string(),
            AxisCommand::Stop => "S".to_string(),
            AxisCommand::PowerOn => "ON".to_string(),
            AxisCommand::PowerOff => "OFF".to_string(),
            AxisCommand::Kill => "K".to_string(),
            AxisCommand::ZeroPosition => "W(PA,0)".to_string(),
        };
        format!("{axis}{op}")
    }
}

/// Believed status of one axis.
#[derive(Clone, Debug, Default)]
pub struct AxisStatus {
    /// Set once the bring-up sequence has completed for this axis.
    pub active: bool,
    /// Cached position in device units; only meaningful after a status
    /// refresh or a tracked motion command.
    pub position: Option<i64>,
    pub velocity: Option<f64>,
    pub acceleration: Option<f64>,
    pub deceleration: Option<f64>,
    /// Travel limit in device units.
    pub limit: i64,
}

/// Shared, cheaply-lockable view of per-axis status. Readers (the status
/// poller, the GUI) take this handle so they never wait behind a long
/// blocking command sequence on the drive itself.
pub type StatusCache = Arc<Mutex<HashMap<u8, AxisStatus>>>;

/// Serial connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// One physical ViX multi-axis controller.
pub struct VixDrive {
    adapter: Option<Box<dyn Adapter>>,
    state: ConnectionState,
    axes: u8,
    pub vel: f64,
    pub accel: f64,
    pub decel: f64,
    status: StatusCache,
    /// Breaks out of settle waits between sequence steps. An in-flight
    /// write is never interrupted.
    abort: Arc<AtomicBool>,
    max_polls: u32,
    poll_interval: Duration,
}

impl VixDrive {
    /// Creates a drive with `axes` axes and the given per-axis travel limits.
    /// Missing limits default to 150000 device units.
    pub fn new(axes: u8, vel: f64, accel: f64, decel: f64, limits: &[i64]) -> Self {
        let mut status = HashMap::new();
        for axis in 1..=axes {
            let limit = limits
                .get(axis as usize - 1)
                .copied()
                .unwrap_or(150_000);
            status.insert(
                axis,
                AxisStatus {
                    limit,
                    ..AxisStatus::default()
                },
            );
        }
        Self {
            adapter: None,
            state: ConnectionState::Disconnected,
            axes,
            vel,
            accel,
            decel,
            status: Arc::new(Mutex::new(status)),
            abort: Arc::new(AtomicBool::new(false)),
            max_polls: DEFAULT_MAX_POLLS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Builds a two-axis drive from the application settings. The drive is
    /// recreated whenever port, baud, axis mapping or limits change.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut limits = [150_000i64, 150_000];
        let x = settings.x_motor.clamp(1, 2) as usize - 1;
        let y = settings.y_motor.clamp(1, 2) as usize - 1;
        limits[x] = settings.max_x;
        limits[y] = settings.max_y;
        Self::new(2, settings.vel, settings.accel, settings.decel, &limits)
    }

    /// Attaches the transport adapter. Until one is attached, `connect`
    /// fails with a configuration error.
    pub fn with_adapter(mut self, adapter: Box<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Swaps the transport adapter; only allowed while disconnected.
    pub fn set_adapter(&mut self, adapter: Box<dyn Adapter>) -> AppResult<()> {
        if self.is_connected() {
            return Err(TraverserError::Connection(
                "Disconnect before changing the serial transport".to_string(),
            ));
        }
        self.adapter = Some(adapter);
        Ok(())
    }

    /// Re-applies motion defaults and travel limits from the settings.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.vel = settings.vel;
        self.accel = settings.accel;
        self.decel = settings.decel;
        let x = settings.x_motor.clamp(1, self.axes.max(1));
        let y = settings.y_motor.clamp(1, self.axes.max(1));
        let _ = self.modify_axis(x, |entry| entry.limit = settings.max_x);
        let _ = self.modify_axis(y, |entry| entry.limit = settings.max_y);
    }

    /// Overrides the settle-wait bound; used by tests to keep timeouts short.
    pub fn with_ready_bound(mut self, max_polls: u32, poll_interval: Duration) -> Self {
        self.max_polls = max_polls;
        self.poll_interval = poll_interval;
        self
    }

    /// Handle onto the shared status cache.
    pub fn status_handle(&self) -> StatusCache {
        Arc::clone(&self.status)
    }

    /// Handle onto the abort flag. Setting it makes any settle wait in
    /// progress, and every subsequent one, fail fast with `ProgramAbort`
    /// until the flag is cleared.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn axes(&self) -> u8 {
        self.axes
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn check_connected(&self) -> AppResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TraverserError::NotConnected)
        }
    }

    fn read_axis(&self, axis: u8) -> AppResult<AxisStatus> {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&axis)
            .cloned()
            .ok_or(TraverserError::UnknownAxis(axis))
    }

    fn modify_axis(&self, axis: u8, f: impl FnOnce(&mut AxisStatus)) -> AppResult<()> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = status
            .get_mut(&axis)
            .ok_or(TraverserError::UnknownAxis(axis))?;
        f(entry);
        Ok(())
    }

    /// Initiates the serial connection. Idempotent; fails with a
    /// configuration error when no transport has been configured.
    pub async fn connect(&mut self) -> DriveResult {
        let adapter = self.adapter.as_mut().ok_or_else(|| {
            TraverserError::Config("Device name / serial port not configured".to_string())
        })?;
        if self.state == ConnectionState::Connected {
            return Ok("Serial device appears to be connected".to_string());
        }
        self.state = ConnectionState::Connecting;
        match adapter.open().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                Ok(format!("Connected to device at {}", adapter.describe()))
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(TraverserError::Connection(e.to_string()))
            }
        }
    }

    /// Closes the serial connection and clears believed status. No-op
    /// success when already disconnected.
    pub async fn disconnect(&mut self) -> DriveResult {
        if self.state != ConnectionState::Connected {
            return Ok("Device already disconnected".to_string());
        }
        let label = match self.adapter.as_mut() {
            Some(adapter) => {
                adapter.close().await?;
                adapter.describe()
            }
            None => "device".to_string(),
        };
        self.state = ConnectionState::Disconnected;
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in status.values_mut() {
            entry.active = false;
            entry.position = None;
            entry.velocity = None;
            entry.acceleration = None;
            entry.deceleration = None;
        }
        Ok(format!("Disconnected from device at {label}"))
    }

    /// Bounded wait for the axis to report not-moving and not-busy.
    async fn drive_wait(&mut self, axis: u8) -> AppResult<bool> {
        let abort = Arc::clone(&self.abort);
        let adapter = self.adapter.as_mut().ok_or(TraverserError::NotConnected)?;
        for _ in 0..self.max_polls {
            if abort.load(Ordering::SeqCst) {
                return Err(TraverserError::ProgramAbort("Stop requested".to_string()));
            }
            let bits = adapter.poll_status(axis).await?;
            if bits.ready() {
                return Ok(true);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(false)
    }

    /// Sends one message to one axis. When `wait` is set, blocks until the
    /// axis is ready both before the write and after it.
    async fn send_message(&mut self, axis: u8, command: &AxisCommand, wait: bool) -> AppResult<()> {
        self.check_connected()?;
        let frame = command.encode(axis);
        if wait && !self.drive_wait(axis).await? {
            return Err(TraverserError::NotReady {
                axis,
                command: frame,
            });
        }
        let adapter = self.adapter.as_mut().ok_or(TraverserError::NotConnected)?;
        adapter.write_message(&frame).await.map_err(|e| {
            TraverserError::Connection(format!("{e} [{frame}]"))
        })?;
        debug!("sent {frame}");
        if wait && !self.drive_wait(axis).await? {
            return Err(TraverserError::NotReady {
                axis,
                command: frame,
            });
        }
        Ok(())
    }

    /// Refreshes one axis's believed status. Fields still unset are
    /// populated from the controller defaults and a placeholder position;
    /// firmware with a real status query would parse its reply here instead.
    pub async fn update_axis_status(&mut self, axis: u8) -> DriveResult {
        self.check_connected()?;
        let (vel, accel, decel) = (self.vel, self.accel, self.decel);
        self.modify_axis(axis, |entry| {
            if entry.position.is_none() {
                entry.position = Some(rand::thread_rng().gen_range(0..entry.limit.max(1)));
            }
            entry.velocity.get_or_insert(vel);
            entry.acceleration.get_or_insert(accel);
            entry.deceleration.get_or_insert(decel);
        })?;
        Ok(format!("Drive {axis} status updated"))
    }

    /// Refreshes every axis.
    pub async fn update_all_status(&mut self) -> DriveResult {
        for axis in 1..=self.axes {
            self.update_axis_status(axis).await?;
        }
        Ok("Drive status updated".to_string())
    }

    /// Runs the fixed bring-up sequence on every axis. On success each axis
    /// is marked active at position 0; any failed step aborts the whole
    /// sequence, leaves no axis marked active, and names the failing step.
    pub async fn start(&mut self) -> DriveResult {
        self.check_connected()?;
        let sequence = [
            AxisCommand::PowerOn,
            AxisCommand::Stop,
            AxisCommand::Kill,
            AxisCommand::SetVelocity(self.vel),
            AxisCommand::SetAcceleration(self.accel),
            AxisCommand::SetDeceleration(self.decel),
            AxisCommand::SetMoveMode(MoveMode::Continuous),
            AxisCommand::SetDirection(Direction::Reverse),
            AxisCommand::SetVelocity(SLOW_VEL),
            AxisCommand::Go,
            AxisCommand::ZeroPosition,
        ];
        for axis in 1..=self.axes {
            for command in &sequence {
                if let Err(e) = self.send_message(axis, command, true).await {
                    // All-or-nothing: a failed bring-up leaves no axis active
                    let mut status =
                        self.status.lock().unwrap_or_else(PoisonError::into_inner);
                    for entry in status.values_mut() {
                        entry.active = false;
                    }
                    return Err(e);
                }
            }
            self.update_axis_status(axis).await?;
            self.modify_axis(axis, |entry| {
                entry.active = true;
                entry.position = Some(0);
                entry.velocity = Some(self.vel);
                entry.acceleration = Some(self.accel);
                entry.deceleration = Some(self.decel);
            })?;
        }
        Ok("Start up complete".to_string())
    }

    /// Stops every axis, optionally powering off afterwards. Stop messages
    /// are sent without waiting. Unlike other sequences this continues
    /// best-effort across axes on failure and always refreshes status,
    /// so the controller is left believed-safe; the first error is returned.
    pub async fn stop(&mut self, switch_off: bool) -> DriveResult {
        self.check_connected()?;
        let mut first_err: Option<TraverserError> = None;
        for axis in 1..=self.axes {
            if let Err(e) = self.send_message(axis, &AxisCommand::Stop, false).await {
                first_err.get_or_insert(e);
            }
            if switch_off {
                if let Err(e) = self.send_message(axis, &AxisCommand::PowerOff, true).await {
                    first_err.get_or_insert(e);
                }
            }
            let _ = self.update_axis_status(axis).await;
            self.modify_axis(axis, |entry| entry.active = false)?;
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok("Stop complete".to_string()),
        }
    }

    /// Starts every axis creeping toward its home limit and resets cached
    /// positions to 0. Does not wait for arrival; the status poller infers
    /// it when the position stops changing.
    pub async fn go_home(&mut self) -> DriveResult {
        self.check_connected()?;
        let sequence = [
            AxisCommand::Stop,
            AxisCommand::SetMoveMode(MoveMode::Continuous),
            AxisCommand::SetDirection(Direction::Reverse),
            AxisCommand::SetVelocity(SLOW_VEL),
            AxisCommand::Go,
        ];
        for axis in 1..=self.axes {
            for command in &sequence {
                self.send_message(axis, command, false).await?;
            }
            self.modify_axis(axis, |entry| entry.position = Some(0))?;
        }
        Ok("Go home in progress".to_string())
    }

    /// Emits the setting commands that differ from the cached status.
    async fn send_differing_settings(
        &mut self,
        axis: u8,
        vel: Option<f64>,
        accel: Option<f64>,
        decel: Option<f64>,
    ) -> AppResult<()> {
        let current = self.read_axis(axis)?;
        let mut commands = Vec::new();
        if let Some(v) = vel {
            if current.velocity != Some(v) {
                commands.push(AxisCommand::SetVelocity(v));
            }
        }
        if let Some(a) = accel {
            if current.acceleration != Some(a) {
                commands.push(AxisCommand::SetAcceleration(a));
            }
        }
        if let Some(d) = decel {
            if current.deceleration != Some(d) {
                commands.push(AxisCommand::SetDeceleration(d));
            }
        }
        for command in &commands {
            self.send_message(axis, command, true).await?;
        }
        self.modify_axis(axis, |entry| {
            if let Some(v) = vel {
                entry.velocity = Some(v);
            }
            if let Some(a) = accel {
                entry.acceleration = Some(a);
            }
            if let Some(d) = decel {
                entry.deceleration = Some(d);
            }
        })?;
        Ok(())
    }

    /// Starts a continuous move on one axis. The cached position is advanced
    /// by an estimated ±5% of the axis travel limit, clamped to
    /// `[0, limit]` — bookkeeping, not a hardware readback.
    pub async fn jog(
        &mut self,
        axis: u8,
        direction: Direction,
        vel: Option<f64>,
        accel: Option<f64>,
        decel: Option<f64>,
    ) -> DriveResult {
        self.check_connected()?;
        self.update_axis_status(axis).await?;
        self.send_differing_settings(axis, vel, accel, decel).await?;
        self.send_message(axis, &AxisCommand::SetDirection(direction), true)
            .await?;
        self.send_message(axis, &AxisCommand::SetMoveMode(MoveMode::Continuous), true)
            .await?;

        self.modify_axis(axis, |entry| {
            let mut step = 0.05 * entry.limit as f64;
            if direction == Direction::Reverse {
                step = -step;
            }
            let estimated = (entry.position.unwrap_or(0) as f64 + step).round() as i64;
            entry.position = Some(estimated.clamp(0, entry.limit));
        })?;

        self.send_message(axis, &AxisCommand::Go, false).await?;
        Ok(format!("Drive {axis} is moving"))
    }

    /// Moves one axis to an absolute position via an incremental move of
    /// `pos - cached`. Waits for settle; on success the cached position is
    /// set to `pos` exactly, correcting any drift from prior jogs.
    pub async fn goto(
        &mut self,
        axis: u8,
        pos: i64,
        vel: Option<f64>,
        accel: Option<f64>,
        decel: Option<f64>,
    ) -> DriveResult {
        self.check_connected()?;
        self.update_axis_status(axis).await?;
        self.send_differing_settings(axis, vel, accel, decel).await?;
        self.send_message(axis, &AxisCommand::SetMoveMode(MoveMode::Incremental), true)
            .await?;

        let current = self.read_axis(axis)?;
        let distance = pos - current.position.unwrap_or(0);
        self.send_message(axis, &AxisCommand::SetDistance(distance), true)
            .await?;
        self.send_message(axis, &AxisCommand::Go, true).await?;

        self.modify_axis(axis, |entry| entry.position = Some(pos))?;
        self.update_axis_status(axis).await?;
        Ok(format!("Drive {axis} moved to {pos}"))
    }

    /// Stops one axis without waiting, then refreshes its status.
    pub async fn stop_axis(&mut self, axis: u8) -> DriveResult {
        self.check_connected()?;
        self.send_message(axis, &AxisCommand::Stop, false).await?;
        self.update_axis_status(axis).await?;
        Ok(format!("Drive {axis} stopped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    fn test_drive(adapter: MockAdapter) -> VixDrive {
        VixDrive::new(2, 2.0, 10.0, 10.0, &[150_000, 150_000])
            .with_adapter(Box::new(adapter))
            .with_ready_bound(10, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_connect_without_adapter_is_config_error() {
        let mut drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[]);
        match drive.connect().await {
            Err(TraverserError::Config(_)) => {}
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let mut drive = test_drive(MockAdapter::new());
        assert!(drive.connect().await.is_ok());
        assert!(drive.is_connected());
        assert!(drive.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_ok() {
        let mut drive = test_drive(MockAdapter::new());
        assert!(drive.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut drive = test_drive(MockAdapter::new());
        assert!(matches!(
            drive.start().await,
            Err(TraverserError::NotConnected)
        ));
        assert!(matches!(
            drive.stop(false).await,
            Err(TraverserError::NotConnected)
        ));
        assert!(matches!(
            drive.go_home().await,
            Err(TraverserError::NotConnected)
        ));
        assert!(matches!(
            drive.jog(1, Direction::Forward, None, None, None).await,
            Err(TraverserError::NotConnected)
        ));
        assert!(matches!(
            drive.goto(1, 100, None, None, None).await,
            Err(TraverserError::NotConnected)
        ));
        assert!(matches!(
            drive.stop_axis(1).await,
            Err(TraverserError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_start_issues_bring_up_sequence_per_axis() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let trace = adapter.trace();
        let mut drive = test_drive(adapter);
        drive.connect().await.unwrap();
        drive.start().await.unwrap();

        let messages = trace.lock().unwrap().clone();
        let expected_per_axis = [
            "ON", "S", "K", "V2", "AA10", "AD10", "MC", "H-", "V0.5", "G", "W(PA,0)",
        ];
        assert_eq!(messages.len(), expected_per_axis.len() * 2);
        for (axis, chunk) in messages.chunks(expected_per_axis.len()).enumerate() {
            for (message, op) in chunk.iter().zip(expected_per_axis.iter()) {
                assert_eq!(message, &format!("{}{}", axis + 1, op));
            }
        }

        for axis in 1..=2 {
            let status = drive.read_axis(axis).unwrap();
            assert!(status.active);
            assert_eq!(status.position, Some(0));
        }
    }

    #[tokio::test]
    async fn test_start_failure_leaves_no_axis_active() {
        let adapter = MockAdapter::new().never_ready();
        let mut drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[])
            .with_adapter(Box::new(adapter))
            .with_ready_bound(2, Duration::from_millis(1));
        drive.connect().await.unwrap();

        match drive.start().await {
            Err(TraverserError::NotReady { axis, .. }) => assert_eq!(axis, 1),
            other => panic!("expected NotReady, got {other:?}"),
        }
        for axis in 1..=2 {
            assert!(!drive.read_axis(axis).unwrap().active);
        }
    }

    #[tokio::test]
    async fn test_stop_marks_axes_inactive() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let trace = adapter.trace();
        let mut drive = test_drive(adapter);
        drive.connect().await.unwrap();
        drive.start().await.unwrap();
        drive.stop(true).await.unwrap();

        let messages = trace.lock().unwrap().clone();
        let tail = &messages[messages.len() - 4..];
        assert_eq!(tail, ["1S", "1OFF", "2S", "2OFF"]);
        for axis in 1..=2 {
            assert!(!drive.read_axis(axis).unwrap().active);
        }
    }

    #[tokio::test]
    async fn test_go_home_resets_positions() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let trace = adapter.trace();
        let mut drive = test_drive(adapter);
        drive.connect().await.unwrap();
        drive.go_home().await.unwrap();

        let messages = trace.lock().unwrap().clone();
        assert_eq!(
            messages,
            vec!["1S", "1MC", "1H-", "1V0.5", "1G", "2S", "2MC", "2H-", "2V0.5", "2G"]
        );
        for axis in 1..=2 {
            assert_eq!(drive.read_axis(axis).unwrap().position, Some(0));
        }
    }

    #[tokio::test]
    async fn test_jog_position_is_clamped() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let mut drive = test_drive(adapter);
        drive.connect().await.unwrap();
        drive.start().await.unwrap();

        // Reverse jogs from 0 stay clamped at 0
        drive
            .jog(1, Direction::Reverse, None, None, None)
            .await
            .unwrap();
        assert_eq!(drive.read_axis(1).unwrap().position, Some(0));

        // 25 forward jogs at 5% per jog saturate at the limit
        for _ in 0..25 {
            drive
                .jog(1, Direction::Forward, None, None, None)
                .await
                .unwrap();
        }
        assert_eq!(drive.read_axis(1).unwrap().position, Some(150_000));
    }

    #[tokio::test]
    async fn test_goto_corrects_jog_drift() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let mut drive = test_drive(adapter);
        drive.connect().await.unwrap();
        drive.start().await.unwrap();

        drive
            .jog(1, Direction::Forward, None, None, None)
            .await
            .unwrap();
        assert_eq!(drive.read_axis(1).unwrap().position, Some(7500));

        drive.goto(1, 12345, None, None, None).await.unwrap();
        assert_eq!(drive.read_axis(1).unwrap().position, Some(12345));
    }

    #[tokio::test]
    async fn test_goto_sends_incremental_distance() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let trace = adapter.trace();
        let mut drive = test_drive(adapter);
        drive.connect().await.unwrap();
        drive.start().await.unwrap();
        drive.goto(1, 1000, None, None, None).await.unwrap();
        drive.goto(1, 400, None, None, None).await.unwrap();

        let messages = trace.lock().unwrap().clone();
        assert!(messages.contains(&"1D1000".to_string()));
        assert!(messages.contains(&"1D-600".to_string()));
    }

    #[tokio::test]
    async fn test_jog_emits_only_differing_settings() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let trace = adapter.trace();
        let mut drive = test_drive(adapter);
        drive.connect().await.unwrap();
        drive.start().await.unwrap();
        let before = trace.lock().unwrap().len();

        // Same velocity as the cache: no V message expected
        drive
            .jog(1, Direction::Forward, Some(2.0), None, None)
            .await
            .unwrap();
        let messages = trace.lock().unwrap()[before..].to_vec();
        assert_eq!(messages, vec!["1H+", "1MC", "1G"]);

        // Different velocity: V message leads
        let before = trace.lock().unwrap().len();
        drive
            .jog(1, Direction::Forward, Some(4.5), None, None)
            .await
            .unwrap();
        let messages = trace.lock().unwrap()[before..].to_vec();
        assert_eq!(messages, vec!["1V4.5", "1H+", "1MC", "1G"]);
    }

    #[tokio::test]
    async fn test_disconnect_clears_status() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let mut drive = test_drive(adapter);
        drive.connect().await.unwrap();
        drive.start().await.unwrap();
        drive.disconnect().await.unwrap();

        let status = drive.read_axis(1).unwrap();
        assert!(!status.active);
        assert_eq!(status.position, None);
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(AxisCommand::PowerOn.encode(1), "1ON");
        assert_eq!(AxisCommand::SetVelocity(0.5).encode(2), "2V0.5");
        assert_eq!(AxisCommand::SetDistance(-600).encode(1), "1D-600");
        assert_eq!(AxisCommand::ZeroPosition.encode(2), "2W(PA,0)");
        assert_eq!(
            AxisCommand::SetDirection(Direction::Forward).encode(1),
            "1H+"
        );
    }
}
