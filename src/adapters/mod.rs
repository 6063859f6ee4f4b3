//! Transport adapters for the drive controller.
//!
//! The drive speaks ASCII messages framed as `<axis-id><opcode>[params]`.
//! The [`Adapter`] trait abstracts the byte transport so the controller logic
//! is identical over a real RS-232 line and over the recording mock used in
//! tests and simulation mode.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;

pub use mock::{MessageTrace, MockAdapter};
#[cfg(feature = "instrument_serial")]
pub use serial::SerialAdapter;

use crate::error::AppResult;
use async_trait::async_trait;

/// Moving / busy bit pair reported by a drive.
///
/// An axis is ready when both bits are clear.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusBits {
    pub moving: bool,
    pub busy: bool,
}

impl StatusBits {
    pub fn ready(self) -> bool {
        !self.moving && !self.busy
    }
}

/// Byte transport for one motor controller connection.
#[async_trait]
pub trait Adapter: Send {
    /// Human-readable description, e.g. the port name.
    fn describe(&self) -> String;

    /// Opens the underlying channel.
    async fn open(&mut self) -> AppResult<()>;

    /// Closes the underlying channel. No-op if already closed.
    async fn close(&mut self) -> AppResult<()>;

    /// Writes one framed message.
    async fn write_message(&mut self, message: &str) -> AppResult<()>;

    /// Samples the moving/busy bit pair for one axis.
    async fn poll_status(&mut self, axis: u8) -> AppResult<StatusBits>;
}
