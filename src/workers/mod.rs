//! Background workers and the exclusive drive access lock.
//!
//! Five long-lived tokio tasks run beside the GUI: the start, stop and
//! program motion workers, the status poller and the instrument poller.
//! Motion workers consume request flags raised by the GUI; pollers tick on
//! their own intervals. All UI-bound updates travel over a channel as
//! [`UiEvent`]s, never by direct mutation from a worker.
//!
//! Every drive command sequence runs while holding the [`DriveLock`], an
//! owner-tracked mutual exclusion wrapper. The owner tag is what makes
//! emergency stop possible: the stop worker can forcibly release the lock out
//! from under a blocked start or program sequence. Forced release does not
//! interrupt an in-flight device write; the drive's abort flag makes the
//! blocked sequence fail fast at its next settle wait instead.

pub mod instrument_poll;
pub mod program_runner;
pub mod start;
pub mod status;
pub mod stop;

use crate::adapters::{Adapter, MockAdapter};
use crate::config::Settings;
use crate::drive::{Direction, StatusCache, VixDrive};
use crate::error::{AppResult, TraverserError};
use crate::event_log::EventLog;
use crate::instrument::{Acquisition, Instrument};
use crate::program::{Program, SharedProgram};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;

pub type SharedDrive = Arc<Mutex<VixDrive>>;
pub type SharedSettings = Arc<RwLock<Settings>>;
pub type SharedInstrument = Arc<Mutex<Option<Box<dyn Instrument>>>>;
/// The GUI's end of the worker event channel.
pub type UiReceiver = mpsc::UnboundedReceiver<UiEvent>;

/// Tasks that may hold the drive lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Worker {
    Ui,
    Start,
    Stop,
    Program,
    StatusPoll,
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Worker::Ui => "ui",
            Worker::Start => "start",
            Worker::Stop => "stop",
            Worker::Program => "program",
            Worker::StatusPoll => "status poll",
        };
        f.write_str(name)
    }
}

/// Owner-tracked mutual exclusion over the drive command stream.
///
/// At most one holder at a time; waiters queue on the inner semaphore.
/// [`DriveLock::try_force_release`] releases the lock on behalf of a named
/// holder, after which that holder's own release becomes a no-op.
pub struct DriveLock {
    permits: Semaphore,
    owner: StdMutex<Option<Worker>>,
}

impl Default for DriveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveLock {
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(1),
            owner: StdMutex::new(None),
        }
    }

    fn set_owner(&self, value: Option<Worker>) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// The current holder, if any.
    pub fn holder(&self) -> Option<Worker> {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for the lock on behalf of `owner`.
    pub async fn acquire(&self, owner: Worker) -> AppResult<DriveGuard<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TraverserError::LockUnavailable)?;
        permit.forget();
        self.set_owner(Some(owner));
        Ok(DriveGuard { lock: self, owner })
    }

    /// Takes the lock only if it is free.
    pub fn try_acquire(&self, owner: Worker) -> Option<DriveGuard<'_>> {
        let permit = self.permits.try_acquire().ok()?;
        permit.forget();
        self.set_owner(Some(owner));
        Some(DriveGuard { lock: self, owner })
    }

    /// Releases the lock on behalf of `target` if that worker holds it.
    /// Returns whether a release happened.
    pub fn try_force_release(&self, target: Worker) -> bool {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(target) {
            *owner = None;
            self.permits.add_permits(1);
            true
        } else {
            false
        }
    }

    fn release(&self, worker: Worker) {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        // A forcibly released (or re-acquired) lock is not ours to return
        if *owner == Some(worker) {
            *owner = None;
            self.permits.add_permits(1);
        }
    }
}

/// Held for the duration of one drive command sequence.
pub struct DriveGuard<'a> {
    lock: &'a DriveLock,
    owner: Worker,
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.owner);
    }
}

/// One edge-triggered request intent, await-consumable.
#[derive(Default)]
pub struct RequestFlag {
    requested: AtomicBool,
    notify: Notify,
}

impl RequestFlag {
    /// Raises the flag and wakes the consumer.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Waits until the flag is raised, consuming it.
    pub async fn wait(&self) {
        loop {
            if self.requested.swap(false, Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Drops a pending request without consuming a wakeup.
    pub fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Shared request/abort state for the motion workers.
pub struct MotionControl {
    pub start: RequestFlag,
    pub stop: RequestFlag,
    pub program: RequestFlag,
    abort: AtomicBool,
    armed: AtomicBool,
}

impl Default for MotionControl {
    fn default() -> Self {
        Self {
            start: RequestFlag::default(),
            stop: RequestFlag::default(),
            program: RequestFlag::default(),
            abort: AtomicBool::new(false),
            armed: AtomicBool::new(true),
        }
    }
}

impl MotionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the start/program workers accept requests.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn rearm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Asks running start/program sequences to bail out between steps.
    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn clear_abort(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Updates pushed from workers to the GUI.
#[derive(Debug)]
pub enum UiEvent {
    /// Cached stage position changed (device units).
    Position { x: i64, y: i64 },
    /// Position stopped changing; jog indications should clear.
    MotionStopped,
    /// The program's point list changed and the overlay needs a redraw.
    ProgramUpdated,
    /// A fresh instrument reading.
    Reading(Acquisition),
    /// Modal alert, used for program-start preconditions.
    Alert(String),
    /// The program worker finished or gave up; controls re-enable.
    ProgramFinished,
}

/// Everything a worker needs, cheap to clone per task.
#[derive(Clone)]
pub struct WorkerContext {
    pub drive: SharedDrive,
    pub lock: Arc<DriveLock>,
    pub status: StatusCache,
    pub drive_abort: Arc<AtomicBool>,
    pub settings: SharedSettings,
    pub program: SharedProgram,
    pub instrument: SharedInstrument,
    pub events: EventLog,
    pub control: Arc<MotionControl>,
    pub ui: mpsc::UnboundedSender<UiEvent>,
    /// Connect with the recording mock instead of a serial port.
    pub simulate: bool,
}

impl WorkerContext {
    /// Builds the shared application state around a drive, returning the
    /// context and the GUI's event receiver.
    pub fn new(
        drive: VixDrive,
        settings: Settings,
        simulate: bool,
    ) -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let status = drive.status_handle();
        let drive_abort = drive.abort_handle();
        let program = Program::default_scan(&settings);
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let ctx = Self {
            drive: Arc::new(Mutex::new(drive)),
            lock: Arc::new(DriveLock::new()),
            status,
            drive_abort,
            settings: Arc::new(RwLock::new(settings)),
            program: Arc::new(RwLock::new(program)),
            instrument: Arc::new(Mutex::new(None)),
            events: EventLog::new(),
            control: Arc::new(MotionControl::new()),
            ui: ui_tx,
            simulate,
        };
        (ctx, ui_rx)
    }

    /// Snapshot of the current settings.
    pub fn settings_snapshot(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Spawns the five background workers.
pub fn spawn_workers(ctx: &WorkerContext) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(start::run(ctx.clone())),
        tokio::spawn(stop::run(ctx.clone())),
        tokio::spawn(program_runner::run(ctx.clone())),
        tokio::spawn(status::run(ctx.clone())),
        tokio::spawn(instrument_poll::run(ctx.clone())),
    ]
}

fn build_adapter(settings: &Settings, simulate: bool) -> AppResult<Box<dyn Adapter>> {
    if simulate {
        return Ok(Box::new(MockAdapter::new().with_ready_after(1)));
    }
    settings.validate_serial()?;
    #[cfg(feature = "instrument_serial")]
    return Ok(Box::new(crate::adapters::SerialAdapter::new(
        settings.serial_port.clone(),
        settings.baud_rate,
        std::time::Duration::from_secs_f64(settings.timeout),
    )));
    #[cfg(not(feature = "instrument_serial"))]
    return Err(TraverserError::Config(
        "Serial support not built in; use simulation mode".to_string(),
    ));
}

/// Connects the drive, refreshing its transport and motion defaults from the
/// current settings first. Invoked from the GUI as a one-shot task.
pub async fn ui_connect(ctx: WorkerContext) {
    let settings = ctx.settings_snapshot();
    let Ok(_guard) = ctx.lock.acquire(Worker::Ui).await else {
        return;
    };
    let mut drive = ctx.drive.lock().await;
    if !drive.is_connected() {
        drive.apply_settings(&settings);
        match build_adapter(&settings, ctx.simulate) {
            Ok(adapter) => {
                if let Err(e) = drive.set_adapter(adapter) {
                    ctx.events.push(e.to_string(), false);
                    return;
                }
            }
            Err(e) => {
                ctx.events.push(e.to_string(), false);
                return;
            }
        }
    }
    match drive.connect().await {
        Ok(msg) => ctx.events.push(msg, true),
        Err(e) => ctx.events.push(e.to_string(), false),
    }
}

/// Disconnects the drive.
pub async fn ui_disconnect(ctx: WorkerContext) {
    let Ok(_guard) = ctx.lock.acquire(Worker::Ui).await else {
        return;
    };
    let mut drive = ctx.drive.lock().await;
    match drive.disconnect().await {
        Ok(msg) => ctx.events.push(msg, true),
        Err(e) => ctx.events.push(e.to_string(), false),
    }
    let _ = ctx.ui.send(UiEvent::MotionStopped);
}

/// Jogs one axis; a one-shot task behind a jog button.
pub async fn ui_jog(ctx: WorkerContext, axis: u8, direction: Direction) {
    let Ok(_guard) = ctx.lock.acquire(Worker::Ui).await else {
        return;
    };
    let mut drive = ctx.drive.lock().await;
    match drive.jog(axis, direction, None, None, None).await {
        Ok(msg) => ctx.events.push(msg, true),
        Err(e) => ctx.events.push(e.to_string(), false),
    }
}

/// Sends both axes creeping home.
pub async fn ui_go_home(ctx: WorkerContext) {
    let Ok(_guard) = ctx.lock.acquire(Worker::Ui).await else {
        return;
    };
    let mut drive = ctx.drive.lock().await;
    match drive.go_home().await {
        Ok(msg) => ctx.events.push(msg, true),
        Err(e) => ctx.events.push(e.to_string(), false),
    }
}

/// Connects the named instrument, creating it first when the slot is empty
/// or holds a different disconnected instrument. A connected instrument is
/// never swapped out from under the pollers; switching requires an explicit
/// disconnect first.
pub async fn ui_connect_instrument(ctx: WorkerContext, name: String) {
    let mut slot = ctx.instrument.lock().await;
    if let Some(current) = slot.as_ref() {
        if current.name() != name {
            if current.connected() {
                ctx.events.push(
                    format!("Disconnect {} before switching instruments", current.name()),
                    false,
                );
                return;
            }
            *slot = None;
        }
    }
    if slot.is_none() {
        match crate::instrument::create(&name) {
            Some(created) => *slot = Some(created),
            None => {
                ctx.events.push(format!("Unknown instrument: {name}"), false);
                return;
            }
        }
    }
    if let Some(instrument) = slot.as_mut() {
        match instrument.connect().await {
            Ok(msg) => ctx.events.push(msg, true),
            Err(e) => ctx.events.push(e.to_string(), false),
        }
    }
}

/// Disconnects the current instrument, if any.
pub async fn ui_disconnect_instrument(ctx: WorkerContext) {
    let mut slot = ctx.instrument.lock().await;
    if let Some(instrument) = slot.as_mut() {
        match instrument.disconnect().await {
            Ok(msg) => ctx.events.push(msg, true),
            Err(e) => ctx.events.push(e.to_string(), false),
        }
    }
}

/// Stops a single axis without disturbing the other.
pub async fn ui_stop_axis(ctx: WorkerContext, axis: u8) {
    let Ok(_guard) = ctx.lock.acquire(Worker::Ui).await else {
        return;
    };
    let mut drive = ctx.drive.lock().await;
    match drive.stop_axis(axis).await {
        Ok(msg) => ctx.events.push(msg, true),
        Err(e) => ctx.events.push(e.to_string(), false),
    }
}
