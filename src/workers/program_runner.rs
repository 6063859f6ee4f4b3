//! Program worker — raster scan execution.
//!
//! Walks the program's point list: for each target, goto x then goto y
//! (blocking), pre-delay, one instrument reading appended to the log file,
//! post-delay. The log is opened per point in append mode, with the header
//! written first when the file is empty, so an aborted run leaves a complete
//! usable file behind.
//!
//! The loop checks for a stop around every move and delay. An emergency stop
//! clears the program's running state in addition to raising the abort flag,
//! which covers a worker parked in a point delay while the stop sequence
//! runs to completion.

use super::{UiEvent, Worker, WorkerContext};
use crate::config::Settings;
use crate::error::AppResult;
use crate::instrument::Acquisition;
use crate::program::{log_header, log_row, ProgramPoint};
use chrono::Local;
use log::debug;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use std::time::Duration;

pub async fn run(ctx: WorkerContext) {
    loop {
        ctx.control.program.wait().await;
        if !ctx.control.is_armed() {
            debug!("program request ignored while disarmed");
            continue;
        }
        run_once(&ctx).await;
        let _ = ctx.ui.send(UiEvent::ProgramFinished);
    }
}

fn alert(ctx: &WorkerContext, message: &str) {
    ctx.events.push(message, false);
    let _ = ctx.ui.send(UiEvent::Alert(message.to_string()));
}

/// Takes the log target chosen in the GUI and verifies it is writable.
fn take_log_file(ctx: &WorkerContext) -> Option<PathBuf> {
    let log_file = {
        let mut program = ctx
            .program
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        program.log_file.take()
    };
    let Some(log_file) = log_file else {
        alert(ctx, "No log file set");
        return None;
    };
    match OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(_) => Some(log_file),
        Err(e) => {
            debug!("log file open failed: {e}");
            alert(ctx, "Failed to open output file for writing");
            None
        }
    }
}

/// An emergency stop raises the abort flag and clears the program's running
/// state. The flags clear again once the stop sequence finishes, so a worker
/// parked in a point delay must also honor the running state or it would
/// resume motion after the stop.
fn stop_requested(ctx: &WorkerContext) -> bool {
    if ctx.control.abort_requested() {
        return true;
    }
    !ctx.program
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .running
}

async fn run_once(ctx: &WorkerContext) {
    let Some(log_file) = take_log_file(ctx) else {
        return;
    };
    {
        let instrument = ctx.instrument.lock().await;
        match instrument.as_ref() {
            None => {
                alert(ctx, "No instrument connected");
                return;
            }
            Some(instrument) if !instrument.connected() => {
                alert(ctx, "Instrument not connected");
                return;
            }
            Some(_) => {}
        }
    }
    ctx.events.push("Program started", true);

    // Halt any motion before the first target
    match locked_stop(ctx).await {
        Ok(msg) => ctx.events.push(msg, true),
        Err(e) => ctx.events.push(e.to_string(), false),
    }

    let settings = ctx.settings_snapshot();
    let (points, pre_delay, post_delay) = {
        let mut program = ctx
            .program
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        program.running = true;
        (
            program.points.clone(),
            program.pre_delay,
            program.post_delay,
        )
    };

    let mut aborted = false;
    for point in points {
        if stop_requested(ctx) {
            aborted = true;
            break;
        }
        match locked_goto(ctx, settings.x_motor, point.x).await {
            Ok(msg) => ctx.events.push(msg, true),
            Err(e) => {
                ctx.events.push(e.to_string(), false);
                aborted = true;
                break;
            }
        }
        match locked_goto(ctx, settings.y_motor, point.y).await {
            Ok(msg) => ctx.events.push(msg, true),
            Err(e) => {
                ctx.events.push(e.to_string(), false);
                aborted = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_secs_f64(pre_delay)).await;
        if stop_requested(ctx) {
            aborted = true;
            break;
        }

        let reading = {
            let mut instrument = ctx.instrument.lock().await;
            match instrument.as_mut() {
                Some(instrument) => instrument.acquire().await,
                None => {
                    ctx.events.push("No instrument connected", false);
                    aborted = true;
                    break;
                }
            }
        };
        for channel in &reading {
            if let Some(error) = &channel.error {
                ctx.events.push(format!("{}: {error}", channel.id), false);
            }
        }
        let _ = ctx.ui.send(UiEvent::Reading(reading.clone()));
        if let Err(e) = append_log_row(&log_file, &settings, point, &reading) {
            ctx.events.push(e.to_string(), false);
            aborted = true;
            break;
        }

        tokio::time::sleep(Duration::from_secs_f64(post_delay)).await;
    }

    {
        let mut program = ctx
            .program
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        program.running = false;
    }
    if aborted {
        ctx.events.push("Program aborted", false);
    } else {
        ctx.events.push("Program completed", true);
    }
}

async fn locked_stop(ctx: &WorkerContext) -> crate::error::DriveResult {
    let _guard = ctx.lock.acquire(Worker::Program).await?;
    let mut drive = ctx.drive.lock().await;
    drive.stop(false).await
}

async fn locked_goto(ctx: &WorkerContext, axis: u8, pos: i64) -> crate::error::DriveResult {
    let _guard = ctx.lock.acquire(Worker::Program).await?;
    let mut drive = ctx.drive.lock().await;
    drive.goto(axis, pos, None, None, None).await
}

/// Appends one reading to the program log, writing the header first when the
/// file is empty.
pub fn append_log_row(
    path: &Path,
    settings: &Settings,
    point: ProgramPoint,
    reading: &Acquisition,
) -> AppResult<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let empty = file.metadata()?.len() == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if empty {
        writer.write_record(log_header(settings, reading))?;
    }
    writer.write_record(log_row(settings, Local::now(), point, reading))?;
    writer.flush()?;
    Ok(())
}
