//! Status poller.
//!
//! Samples the cached stage position at a fixed interval and forwards
//! changes to the GUI. When a position that was moving stops changing, the
//! poller refreshes the drive status once under the lock and re-reads; if it
//! is still unchanged the motion is treated as stopped and the GUI clears
//! its jog indications. Refreshes are skipped rather than queued when the
//! drive is busy with a long command sequence.
//!
//! The poller also owns program-overlay redraw notification: whenever the
//! program's `updated` flag is set it emits a redraw event and clears it.

use super::{UiEvent, Worker, WorkerContext};
use crate::drive::StatusCache;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

const STATUS_INTERVAL: Duration = Duration::from_millis(500);

fn cached_position(status: &StatusCache, x_motor: u8, y_motor: u8) -> Option<(i64, i64)> {
    let status = status.lock().unwrap_or_else(PoisonError::into_inner);
    let x = status.get(&x_motor)?.position?;
    let y = status.get(&y_motor)?.position?;
    Some((x, y))
}

pub async fn run(ctx: WorkerContext) {
    let mut interval = tokio::time::interval(STATUS_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Option<(i64, i64)> = None;
    let mut moving = false;

    loop {
        interval.tick().await;
        tick(&ctx, &mut last, &mut moving).await;
    }
}

async fn tick(ctx: &WorkerContext, last: &mut Option<(i64, i64)>, moving: &mut bool) {
    {
        let mut program = ctx
            .program
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if program.updated {
            program.updated = false;
            let _ = ctx.ui.send(UiEvent::ProgramUpdated);
        }
    }

    let (x_motor, y_motor) = {
        let settings = ctx
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        (settings.x_motor, settings.y_motor)
    };

    // Position cache is cleared on disconnect, so None doubles as "not
    // connected / not started"
    let Some(current) = cached_position(&ctx.status, x_motor, y_motor) else {
        *last = None;
        *moving = false;
        return;
    };

    if *last != Some(current) {
        *moving = true;
        *last = Some(current);
        let _ = ctx.ui.send(UiEvent::Position {
            x: current.0,
            y: current.1,
        });
        return;
    }

    if !*moving {
        return;
    }

    // Double-check: refresh once, then re-read before declaring the stage
    // settled
    if let Some(_guard) = ctx.lock.try_acquire(Worker::StatusPoll) {
        if let Ok(mut drive) = ctx.drive.try_lock() {
            if drive.is_connected() {
                let _ = drive.update_all_status().await;
            }
        }
    }
    match cached_position(&ctx.status, x_motor, y_motor) {
        Some(refreshed) if refreshed == current => {
            *moving = false;
            let _ = ctx.ui.send(UiEvent::MotionStopped);
        }
        Some(refreshed) => {
            *last = Some(refreshed);
            let _ = ctx.ui.send(UiEvent::Position {
                x: refreshed.0,
                y: refreshed.1,
            });
        }
        None => {
            *last = None;
            *moving = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::config::Settings;
    use crate::drive::VixDrive;

    #[tokio::test]
    async fn test_position_change_then_settle() {
        let adapter = MockAdapter::new().with_ready_after(1);
        let drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[1000, 1000])
            .with_adapter(Box::new(adapter))
            .with_ready_bound(5, Duration::from_millis(1));
        let (ctx, mut ui_rx) = WorkerContext::new(drive, Settings::default(), true);
        {
            let mut drive = ctx.drive.lock().await;
            drive.connect().await.unwrap();
            drive.start().await.unwrap();
        }

        let mut last = None;
        let mut moving = false;

        // First observation of (0, 0) counts as a change
        tick(&ctx, &mut last, &mut moving).await;
        assert!(moving);
        // Unchanged position settles
        tick(&ctx, &mut last, &mut moving).await;
        assert!(!moving);

        let mut saw_position = false;
        let mut saw_stopped = false;
        while let Ok(event) = ui_rx.try_recv() {
            match event {
                UiEvent::Position { x: 0, y: 0 } => saw_position = true,
                UiEvent::MotionStopped => saw_stopped = true,
                _ => {}
            }
        }
        assert!(saw_position);
        assert!(saw_stopped);
    }

    #[tokio::test]
    async fn test_disconnected_stage_is_a_noop() {
        let drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[])
            .with_adapter(Box::new(MockAdapter::new()))
            .with_ready_bound(5, Duration::from_millis(1));
        let (ctx, mut ui_rx) = WorkerContext::new(drive, Settings::default(), true);
        // Drain the initial program redraw notification
        let mut last = None;
        let mut moving = false;
        tick(&ctx, &mut last, &mut moving).await;
        while let Ok(event) = ui_rx.try_recv() {
            assert!(matches!(event, UiEvent::ProgramUpdated));
        }
        assert_eq!(last, None);
    }

    #[tokio::test]
    async fn test_program_update_flag_emits_once() {
        let drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[])
            .with_adapter(Box::new(MockAdapter::new()));
        let (ctx, mut ui_rx) = WorkerContext::new(drive, Settings::default(), true);

        let mut last = None;
        let mut moving = false;
        tick(&ctx, &mut last, &mut moving).await;
        tick(&ctx, &mut last, &mut moving).await;

        let redraws = std::iter::from_fn(|| ui_rx.try_recv().ok())
            .filter(|e| matches!(e, UiEvent::ProgramUpdated))
            .count();
        assert_eq!(redraws, 1);
    }
}
