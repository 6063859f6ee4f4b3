//! Emergency stop against a blocked motion sequence.
//!
//! The start worker gets stuck in a bring-up settle wait on an axis that
//! never reports ready. A stop request must still go through: the lock is
//! forcibly released, the blocked sequence bails out at its next poll, and
//! the stop messages reach the device.

use std::time::Duration;
use traverser::adapters::MockAdapter;
use traverser::config::Settings;
use traverser::drive::VixDrive;
use traverser::instrument;
use traverser::program::{Program, ScanOrder};
use traverser::workers::{self, WorkerContext};

fn blocked_context() -> (WorkerContext, workers::UiReceiver) {
    let adapter = MockAdapter::new().never_ready();
    let drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[100_000, 100_000])
        .with_adapter(Box::new(adapter))
        .with_ready_bound(100_000, Duration::from_millis(5));
    WorkerContext::new(drive, Settings::default(), true)
}

#[tokio::test]
async fn stop_interrupts_a_blocked_start() {
    let (ctx, _ui_rx) = blocked_context();
    ctx.drive.lock().await.connect().await.unwrap();
    let _workers = workers::spawn_workers(&ctx);

    ctx.control.start.request();
    // Let the start worker take the lock and block in the settle wait
    tokio::time::timeout(Duration::from_secs(5), async {
        while ctx.lock.holder().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("start worker never took the lock");

    ctx.control.stop.request();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let done = ctx
                .events
                .snapshot()
                .iter()
                .any(|e| e.message.contains("Stop complete"));
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stop never completed");

    // The blocked sequence reported its abort and the workers re-armed
    assert!(ctx
        .events
        .snapshot()
        .iter()
        .any(|e| e.message.contains("Stop requested")));
    assert!(ctx.control.is_armed());
    assert_eq!(ctx.lock.holder(), None);
}

#[tokio::test]
async fn stop_ends_a_program_waiting_between_points() {
    let adapter = MockAdapter::new().with_ready_after(1);
    let trace = adapter.trace();
    let drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[100, 100])
        .with_adapter(Box::new(adapter))
        .with_ready_bound(10, Duration::from_millis(5));
    let settings = Settings {
        max_x: 100,
        max_y: 100,
        x_dist: 100.0,
        y_dist: 100.0,
        ..Settings::default()
    };
    let (ctx, _ui_rx) = WorkerContext::new(drive, settings.clone(), true);
    {
        let mut drive = ctx.drive.lock().await;
        drive.connect().await.unwrap();
        drive.start().await.unwrap();
    }
    {
        let mut slot = ctx.instrument.lock().await;
        let mut sensor = instrument::create("Random Number Generator").unwrap();
        sensor.connect().await.unwrap();
        *slot = Some(sensor);
    }
    let dir = tempfile::tempdir().unwrap();
    {
        let mut program = ctx.program.write().unwrap();
        *program = Program::generate(
            &settings, 0.0, 20.0, 0.0, 0.0, 10.0, 10.0, 0.5, 0.5, ScanOrder::XThenY,
        );
        program.log_file = Some(dir.path().join("scan.csv"));
        assert_eq!(program.points.len(), 3);
    }
    let _workers = workers::spawn_workers(&ctx);
    ctx.control.program.request();

    let move_count = || {
        trace
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m[1..].starts_with("MI"))
            .count()
    };

    // Wait for the first point's two moves, then stop during the pre-delay
    tokio::time::timeout(Duration::from_secs(10), async {
        while move_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first point never moved");

    ctx.control.stop.request();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let done = ctx
                .events
                .snapshot()
                .iter()
                .any(|e| e.message.contains("Stop complete"));
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stop never completed");

    // Outlast the point delays; the worker must not wake up and keep moving
    let moves_at_stop = move_count();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(move_count(), moves_at_stop);

    let events = ctx.events.snapshot();
    assert!(events.iter().any(|e| e.message == "Program aborted"));
    assert!(!events.iter().any(|e| e.message == "Program completed"));
    assert!(!ctx.program.read().unwrap().running);
    assert!(ctx.control.is_armed());
}
