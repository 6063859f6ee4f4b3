//! Traverser: a two-axis motorized stage controller.
//!
//! Drives a pair of ViX stepper motor controllers over a serial line, runs
//! raster-scan measurement programs against a pluggable instrument, and
//! presents an egui control panel with a live position plot.
//!
//! ## Architecture
//!
//! - [`drive`] owns the ViX ASCII protocol and per-axis cached status, over
//!   a transport from [`adapters`].
//! - [`workers`] holds the background tasks (start, stop, program, status
//!   poll, instrument poll) and the owner-tracked [`workers::DriveLock`]
//!   that serializes drive command sequences. The stop worker can forcibly
//!   release the lock for emergency stop.
//! - [`instrument`] is the measurement device registry; [`program`] the
//!   raster-scan model and log formatting; [`config`] the flat key-value
//!   settings file; [`event_log`] the feed rendered by [`gui`].
//!
//! The GUI is presentation only: every piece of worker logic is reachable,
//! and tested, without it.

pub mod adapters;
pub mod config;
pub mod drive;
pub mod error;
pub mod event_log;
pub mod gui;
pub mod instrument;
pub mod program;
pub mod workers;

pub use error::{AppResult, DriveResult, TraverserError};
