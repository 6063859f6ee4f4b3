//! Pluggable measurement instruments.
//!
//! An [`Instrument`] is the device sampled at each program point and by the
//! instrument poller. Implementations register themselves in a static
//! registry by name; the GUI lists the registry and constructs the selected
//! instrument.
//!
//! `acquire` never fails at the call level: channels that could not be read
//! carry an error string instead of a value, so one bad channel does not
//! discard the rest of a reading.

pub mod environment;
pub mod random;

pub use environment::EnvironmentSensor;
pub use random::RandomNumberGenerator;

use crate::error::AppResult;
use async_trait::async_trait;

/// One measurement channel of an acquired reading.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    /// Channel identifier, e.g. `temperature`.
    pub id: String,
    /// The reading; `None` when this channel errored.
    pub value: Option<f64>,
    /// Engineering unit, possibly empty.
    pub unit: String,
    /// Error text when the channel could not be read.
    pub error: Option<String>,
}

/// One complete reading: the instrument's channels, in declaration order.
pub type Acquisition = Vec<Channel>;

/// A device that produces readings for the program log and live display.
#[async_trait]
pub trait Instrument: Send {
    /// Display name shown in the GUI selector and the log header.
    fn name(&self) -> &str;

    /// Whether the device is currently connected.
    fn connected(&self) -> bool;

    /// Connects to the device. The returned message goes to the event feed.
    async fn connect(&mut self) -> AppResult<String>;

    /// Disconnects from the device.
    async fn disconnect(&mut self) -> AppResult<String>;

    /// Acquires one reading across all channels.
    async fn acquire(&mut self) -> Acquisition;
}

/// Constructor type for registry entries.
pub type InstrumentCtor = fn() -> Box<dyn Instrument>;

/// The built-in instrument registry: display name plus constructor.
/// Drivers are added here explicitly.
pub const REGISTRY: &[(&str, InstrumentCtor)] = &[
    ("Environment Sensor", || Box::new(EnvironmentSensor::new())),
    ("Random Number Generator", || {
        Box::new(RandomNumberGenerator::new())
    }),
];

/// Instantiates a registered instrument by display name.
pub fn create(name: &str) -> Option<Box<dyn Instrument>> {
    REGISTRY
        .iter()
        .find(|(entry, _)| *entry == name)
        .map(|(_, ctor)| ctor())
}

/// Display names of all registered instruments.
pub fn names() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}

/// A disconnected-instrument reading: every channel errored, no values.
pub(crate) fn disconnected_reading(ids_units: &[(&str, &str)]) -> Acquisition {
    ids_units
        .iter()
        .map(|(id, unit)| Channel {
            id: (*id).to_string(),
            value: None,
            unit: (*unit).to_string(),
            error: Some("Device not connected".to_string()),
        })
        .collect()
}
