//! Recording mock adapter.
//!
//! Records every framed message it is given, and reports an axis as ready
//! after a configurable number of status polls. Used by the test suite (the
//! trace makes command ordering observable) and by `--simulate` runs without
//! hardware attached.

use super::{Adapter, StatusBits};
use crate::error::{AppResult, TraverserError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared handle onto the messages a [`MockAdapter`] has written.
pub type MessageTrace = Arc<Mutex<Vec<String>>>;

pub struct MockAdapter {
    open: bool,
    trace: MessageTrace,
    /// Polls before an axis reports not-moving/not-busy.
    ready_after: u32,
    poll_counts: HashMap<u8, u32>,
    /// When set, every write fails with a connection error.
    fail_writes: bool,
    /// When set, axes never report ready, to exercise the settle timeout.
    never_ready: bool,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            open: false,
            trace: Arc::new(Mutex::new(Vec::new())),
            ready_after: 3,
            poll_counts: HashMap::new(),
            fail_writes: false,
            never_ready: false,
        }
    }

    /// Handle to the recorded messages; clone before handing the adapter to
    /// the drive.
    pub fn trace(&self) -> MessageTrace {
        Arc::clone(&self.trace)
    }

    pub fn with_ready_after(mut self, polls: u32) -> Self {
        self.ready_after = polls;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    async fn open(&mut self) -> AppResult<()> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        self.open = false;
        Ok(())
    }

    async fn write_message(&mut self, message: &str) -> AppResult<()> {
        if !self.open {
            return Err(TraverserError::NotConnected);
        }
        if self.fail_writes {
            return Err(TraverserError::Connection(
                "mock write failure".to_string(),
            ));
        }
        if let Ok(mut trace) = self.trace.lock() {
            trace.push(message.to_string());
        }
        Ok(())
    }

    async fn poll_status(&mut self, axis: u8) -> AppResult<StatusBits> {
        if !self.open {
            return Err(TraverserError::NotConnected);
        }
        if self.never_ready {
            return Ok(StatusBits {
                moving: true,
                busy: true,
            });
        }
        let count = self.poll_counts.entry(axis).or_insert(0);
        *count += 1;
        if *count < self.ready_after {
            Ok(StatusBits {
                moving: true,
                busy: true,
            })
        } else {
            // Reset so the next command waits again
            *count = 0;
            Ok(StatusBits::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_messages() {
        let mut adapter = MockAdapter::new();
        let trace = adapter.trace();
        adapter.open().await.unwrap();
        adapter.write_message("1ON").await.unwrap();
        adapter.write_message("1G").await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["1ON", "1G"]);
    }

    #[tokio::test]
    async fn test_closed_adapter_rejects_writes() {
        let mut adapter = MockAdapter::new();
        assert!(adapter.write_message("1S").await.is_err());
    }

    #[tokio::test]
    async fn test_ready_after_polls() {
        let mut adapter = MockAdapter::new().with_ready_after(3);
        adapter.open().await.unwrap();
        assert!(!adapter.poll_status(1).await.unwrap().ready());
        assert!(!adapter.poll_status(1).await.unwrap().ready());
        assert!(adapter.poll_status(1).await.unwrap().ready());
        // Counter resets after reporting ready
        assert!(!adapter.poll_status(1).await.unwrap().ready());
    }
}
