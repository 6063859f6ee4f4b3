//! Application configuration.
//!
//! Settings live in a flat `key = value` file (default `~/.traverser.ini`).
//! The recognized key set is fixed; unknown keys are ignored on read and all
//! recognized keys are always written on save, so a hand-edited file never
//! loses fields. Reading goes through the `config` crate's INI source layered
//! over built-in defaults.
//!
//! Configuration values may be read from any task, but should only be mutated
//! from the UI; workers re-read the shared copy on each tick rather than
//! caching their own.

use crate::error::{AppResult, TraverserError};
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Logical stage axis, mapped onto a motor id by [`Settings`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageAxis {
    X,
    Y,
}

/// Traverse configuration values.
///
/// Field names match the keys in the configuration file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Serial port / device path
    pub serial_port: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Serial timeout in seconds
    pub timeout: f64,
    /// Default velocity
    pub vel: f64,
    /// Default acceleration
    pub accel: f64,
    /// Default deceleration
    pub decel: f64,
    /// Motor id assigned to the x axis
    pub x_motor: u8,
    /// Motor id assigned to the y axis
    pub y_motor: u8,
    /// X travel limit in device units
    pub max_x: i64,
    /// Y travel limit in device units
    pub max_y: i64,
    /// X travel in `x_units`
    pub x_dist: f64,
    /// Y travel in `y_units`
    pub y_dist: f64,
    /// X distance units
    pub x_units: String,
    /// Y distance units
    pub y_units: String,
    /// Instrument poll interval in seconds
    pub poll_instrument: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            timeout: 0.5,
            vel: 2.0,
            accel: 10.0,
            decel: 10.0,
            x_motor: 1,
            y_motor: 2,
            max_x: 2_046_658,
            max_y: 2_364_810,
            x_dist: 2400.0,
            y_dist: 2750.0,
            x_units: "mm".to_string(),
            y_units: "mm".to_string(),
            poll_instrument: 1.0,
        }
    }
}

impl Settings {
    /// Default configuration file location (`~/.traverser.ini`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".traverser.ini")
    }

    /// Loads settings from `path`, falling back to defaults for any missing
    /// key. A missing file yields the defaults; unknown keys are ignored.
    pub fn load(path: &Path) -> AppResult<Self> {
        let mut builder = Config::builder();
        if path.exists() {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Ini)
                    .required(false),
            );
        }
        let loaded = builder.build()?;

        let mut settings = Self::default();
        macro_rules! read_key {
            ($field:ident, $kind:ident) => {
                if let Ok(value) = loaded.$kind(stringify!($field)) {
                    settings.$field = value;
                }
            };
        }
        read_key!(serial_port, get_string);
        if let Ok(value) = loaded.get_int("baud_rate") {
            settings.baud_rate = value as u32;
        }
        read_key!(timeout, get_float);
        read_key!(vel, get_float);
        read_key!(accel, get_float);
        read_key!(decel, get_float);
        if let Ok(value) = loaded.get_int("x_motor") {
            settings.x_motor = value as u8;
        }
        if let Ok(value) = loaded.get_int("y_motor") {
            settings.y_motor = value as u8;
        }
        read_key!(max_x, get_int);
        read_key!(max_y, get_int);
        read_key!(x_dist, get_float);
        read_key!(y_dist, get_float);
        read_key!(x_units, get_string);
        read_key!(y_units, get_string);
        read_key!(poll_instrument, get_float);
        Ok(settings)
    }

    /// Writes all recognized keys to `path`.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let mut out = String::new();
        let mut push = |key: &str, value: String| {
            // write! to a String cannot fail
            let _ = writeln!(out, "{key} = {value}");
        };
        push("serial_port", self.serial_port.clone());
        push("baud_rate", self.baud_rate.to_string());
        push("timeout", self.timeout.to_string());
        push("vel", self.vel.to_string());
        push("accel", self.accel.to_string());
        push("decel", self.decel.to_string());
        push("x_motor", self.x_motor.to_string());
        push("y_motor", self.y_motor.to_string());
        push("max_x", self.max_x.to_string());
        push("max_y", self.max_y.to_string());
        push("x_dist", self.x_dist.to_string());
        push("y_dist", self.y_dist.to_string());
        push("x_units", self.x_units.clone());
        push("y_units", self.y_units.clone());
        push("poll_instrument", self.poll_instrument.to_string());
        std::fs::write(path, out)?;
        Ok(())
    }

    /// Motor id for a logical axis.
    pub fn motor(&self, axis: StageAxis) -> u8 {
        match axis {
            StageAxis::X => self.x_motor,
            StageAxis::Y => self.y_motor,
        }
    }

    /// Travel limit in device units for a logical axis.
    pub fn limit(&self, axis: StageAxis) -> i64 {
        match axis {
            StageAxis::X => self.max_x,
            StageAxis::Y => self.max_y,
        }
    }

    /// Unit label for a logical axis.
    pub fn units(&self, axis: StageAxis) -> &str {
        match axis {
            StageAxis::X => &self.x_units,
            StageAxis::Y => &self.y_units,
        }
    }

    /// Converts a position in engineering units to device units, rounded to
    /// an integer count.
    pub fn units_to_value(&self, units: f64, axis: StageAxis) -> i64 {
        let (max, dist) = match axis {
            StageAxis::X => (self.max_x, self.x_dist),
            StageAxis::Y => (self.max_y, self.y_dist),
        };
        ((units / dist) * max as f64).round() as i64
    }

    /// Converts a device-unit position to engineering units.
    pub fn value_to_units(&self, value: i64, axis: StageAxis) -> f64 {
        let (max, dist) = match axis {
            StageAxis::X => (self.max_x, self.x_dist),
            StageAxis::Y => (self.max_y, self.y_dist),
        };
        (value as f64 / max as f64) * dist
    }

    /// Validates values that must be set before a connect attempt.
    pub fn validate_serial(&self) -> AppResult<()> {
        if self.serial_port.is_empty() {
            return Err(TraverserError::Config(
                "Device name / serial port not configured".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(TraverserError::Config(
                "Baud rate not configured".to_string(),
            ));
        }
        Ok(())
    }
}
