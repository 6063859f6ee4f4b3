//! Instrument poller.
//!
//! Acquires a reading from the connected instrument at the configured
//! interval and publishes it to the GUI. The interval is re-read from the
//! settings every tick so changes apply without a restart. Channel errors go
//! to the event feed; the reading is still published so the display shows
//! which channels survived.

use super::{UiEvent, WorkerContext};
use std::sync::PoisonError;
use std::time::Duration;

/// Floor keeps a mistyped interval from turning into a busy loop.
const MIN_INTERVAL: f64 = 0.1;

pub async fn run(ctx: WorkerContext) {
    loop {
        let seconds = {
            let settings = ctx
                .settings
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            settings.poll_instrument.max(MIN_INTERVAL)
        };
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        poll_once(&ctx).await;
    }
}

async fn poll_once(ctx: &WorkerContext) {
    let reading = {
        let mut instrument = ctx.instrument.lock().await;
        match instrument.as_mut() {
            Some(instrument) if instrument.connected() => instrument.acquire().await,
            _ => return,
        }
    };
    for channel in &reading {
        if let Some(error) = &channel.error {
            ctx.events.push(format!("{}: {error}", channel.id), false);
        }
    }
    let _ = ctx.ui.send(UiEvent::Reading(reading));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::config::Settings;
    use crate::drive::VixDrive;
    use crate::instrument;

    #[tokio::test]
    async fn test_poll_publishes_reading() {
        let drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[])
            .with_adapter(Box::new(MockAdapter::new()));
        let (ctx, mut ui_rx) = WorkerContext::new(drive, Settings::default(), true);
        {
            let mut slot = ctx.instrument.lock().await;
            let mut sensor = instrument::create("Environment Sensor").unwrap();
            sensor.connect().await.unwrap();
            *slot = Some(sensor);
        }

        poll_once(&ctx).await;
        let event = ui_rx.try_recv().unwrap();
        match event {
            UiEvent::Reading(reading) => assert_eq!(reading.len(), 2),
            other => panic!("expected reading, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_instrument_is_silent() {
        let drive = VixDrive::new(2, 2.0, 10.0, 10.0, &[])
            .with_adapter(Box::new(MockAdapter::new()));
        let (ctx, mut ui_rx) = WorkerContext::new(drive, Settings::default(), true);

        poll_once(&ctx).await;
        assert!(ui_rx.try_recv().is_err());
        assert!(ctx.events.snapshot().is_empty());
    }
}
