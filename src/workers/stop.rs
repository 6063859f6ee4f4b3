//! Stop worker — emergency stop.
//!
//! A stop request must succeed even while another worker holds the drive
//! lock in the middle of a long blocking sequence. The recovery order is:
//! disarm the other motion workers, raise the abort flags so a blocked
//! sequence fails fast at its next settle wait, forcibly release the lock
//! from whichever worker holds it, then take the lock and issue the stop,
//! retrying with backoff on transient failures. Afterwards the abort flags
//! clear and the workers re-arm.

use super::{UiEvent, Worker, WorkerContext};
use crate::error::TraverserError;
use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use std::time::Duration;

const STOP_ATTEMPTS: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

pub async fn run(ctx: WorkerContext) {
    loop {
        ctx.control.stop.wait().await;
        stop_all(&ctx).await;
    }
}

/// Runs one full emergency-stop cycle.
pub async fn stop_all(ctx: &WorkerContext) {
    ctx.events.push("Stop requested", true);
    ctx.control.disarm();
    ctx.control.request_abort();
    ctx.drive_abort.store(true, Ordering::SeqCst);

    for target in [Worker::Start, Worker::Program, Worker::Ui] {
        if ctx.lock.try_force_release(target) {
            ctx.events
                .push(format!("Released drive lock held by {target} worker"), true);
        }
    }
    {
        let mut program = ctx
            .program
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        program.running = false;
    }

    let Ok(_guard) = ctx.lock.acquire(Worker::Stop).await else {
        return;
    };
    let mut drive = ctx.drive.lock().await;
    // The stop sequence itself must not trip over the abort flag
    ctx.drive_abort.store(false, Ordering::SeqCst);

    let mut backoff = INITIAL_BACKOFF;
    for attempt in 1..=STOP_ATTEMPTS {
        match drive.stop(false).await {
            Ok(msg) => {
                ctx.events.push(msg, true);
                break;
            }
            Err(TraverserError::NotConnected) => {
                ctx.events
                    .push("Device does not appear to be connected", false);
                break;
            }
            Err(e) => {
                ctx.events.push(e.to_string(), false);
                if attempt == STOP_ATTEMPTS {
                    break;
                }
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
    drop(drive);

    ctx.control.start.clear();
    ctx.control.program.clear();
    ctx.control.clear_abort();
    ctx.control.rearm();
    let _ = ctx.ui.send(UiEvent::MotionStopped);
    let _ = ctx.ui.send(UiEvent::ProgramFinished);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::config::Settings;
    use crate::drive::VixDrive;

    #[tokio::test]
    async fn test_stop_releases_a_held_lock_and_rearms() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let trace = adapter.trace();
        let drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[1000, 1000])
            .with_adapter(Box::new(adapter))
            .with_ready_bound(5, Duration::from_millis(1));
        let (ctx, _ui_rx) = WorkerContext::new(drive, Settings::default(), true);
        ctx.drive.lock().await.connect().await.unwrap();

        // A stuck program worker holds the lock and never releases it
        let held = ctx.lock.acquire(Worker::Program).await.unwrap();
        std::mem::forget(held);
        assert_eq!(ctx.lock.holder(), Some(Worker::Program));

        tokio::time::timeout(Duration::from_secs(5), stop_all(&ctx))
            .await
            .unwrap();

        assert_eq!(ctx.lock.holder(), None);
        assert!(ctx.control.is_armed());
        assert!(!ctx.control.abort_requested());
        let messages = trace.lock().unwrap().clone();
        assert!(messages.contains(&"1S".to_string()));
        assert!(messages.contains(&"2S".to_string()));
    }

    #[tokio::test]
    async fn test_stop_without_connection_reports_once() {
        let drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[])
            .with_adapter(Box::new(MockAdapter::new()))
            .with_ready_bound(5, Duration::from_millis(1));
        let (ctx, _ui_rx) = WorkerContext::new(drive, Settings::default(), true);

        tokio::time::timeout(Duration::from_secs(5), stop_all(&ctx))
            .await
            .unwrap();
        let errors: Vec<_> = ctx
            .events
            .snapshot()
            .into_iter()
            .filter(|e| e.message.contains("does not appear to be connected"))
            .collect();
        // No retry storm on a disconnected device
        assert_eq!(errors.len(), 1);
    }
}
