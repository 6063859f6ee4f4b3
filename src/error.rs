//! Custom error types for the application.
//!
//! This module defines the primary error type, `TraverserError`, used across
//! the drive controller, the motion workers and the program runner. Using the
//! `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures the stage controller can produce.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: the serial port or baud rate is missing or invalid. Fatal
//!   to a connect attempt, recoverable by reconfiguration.
//! - **`Connection`**: an underlying serial I/O failure. Recoverable; the
//!   user can retry after checking the cable/port.
//! - **`NotConnected`**: an axis-affecting operation was attempted while the
//!   drive is disconnected. Always checked before any I/O.
//! - **`NotReady`**: the bounded settle-wait for an axis was exhausted. The
//!   failing axis and command are surfaced so the log names the exact step.
//! - **`ProgramAbort`**: a goto failed mid-scan; remaining points are skipped
//!   and the partial log file is preserved.
//!
//! Low-level drive results propagate unchanged through the lock-wrapped call
//! to the invoking worker, which logs them and decides continuation.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, TraverserError>;

/// Result of a drive command sequence: the success message shown in the
/// event feed, or the error that aborted the sequence.
pub type DriveResult = std::result::Result<String, TraverserError>;

#[derive(Error, Debug)]
pub enum TraverserError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Device does not appear to be connected")]
    NotConnected,

    #[error("Drive {axis} does not appear to be ready [{command}]")]
    NotReady { axis: u8, command: String },

    #[error("Program aborted: {0}")]
    ProgramAbort(String),

    #[error("Unknown axis {0}")]
    UnknownAxis(u8),

    #[error("Drive lock unavailable")]
    LockUnavailable,

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
