//! Start worker.
//!
//! Consumes start requests from the GUI. Each request runs one locked
//! stop-then-start sequence: axes are halted first so the bring-up never
//! fights a move already in progress.

use super::{Worker, WorkerContext};
use log::debug;

pub async fn run(ctx: WorkerContext) {
    loop {
        ctx.control.start.wait().await;
        if !ctx.control.is_armed() {
            debug!("start request ignored while disarmed");
            continue;
        }
        run_once(&ctx).await;
    }
}

async fn run_once(ctx: &WorkerContext) {
    let Ok(_guard) = ctx.lock.acquire(Worker::Start).await else {
        return;
    };
    let mut drive = ctx.drive.lock().await;
    if !drive.is_connected() {
        ctx.events
            .push("Device does not appear to be connected", false);
        return;
    }
    match drive.stop(false).await {
        Ok(msg) => ctx.events.push(msg, true),
        Err(e) => {
            ctx.events.push(e.to_string(), false);
            return;
        }
    }
    if ctx.control.abort_requested() {
        return;
    }
    match drive.start().await {
        Ok(msg) => ctx.events.push(msg, true),
        Err(e) => ctx.events.push(e.to_string(), false),
    }
}
