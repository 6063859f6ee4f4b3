//! Simulated environment sensor.
//!
//! Reports temperature and relative humidity as random values in plausible
//! ranges. Stands in for a real probe during bench testing.

use super::{disconnected_reading, Acquisition, Channel, Instrument};
use crate::error::AppResult;
use async_trait::async_trait;
use rand::Rng;

const CHANNELS: &[(&str, &str)] = &[("temperature", "C"), ("humidity", "%")];

#[derive(Default)]
pub struct EnvironmentSensor {
    connected: bool,
}

impl EnvironmentSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Instrument for EnvironmentSensor {
    fn name(&self) -> &str {
        "Environment Sensor"
    }

    fn connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> AppResult<String> {
        self.connected = true;
        Ok(format!("Connected {}", self.name()))
    }

    async fn disconnect(&mut self) -> AppResult<String> {
        self.connected = false;
        Ok(format!("Disconnected {}", self.name()))
    }

    async fn acquire(&mut self) -> Acquisition {
        if !self.connected {
            return disconnected_reading(CHANNELS);
        }
        let mut rng = rand::thread_rng();
        vec![
            Channel {
                id: "temperature".to_string(),
                value: Some(rng.gen_range(5..=35) as f64),
                unit: "C".to_string(),
                error: None,
            },
            Channel {
                id: "humidity".to_string(),
                value: Some(rng.gen_range(0..=100) as f64),
                unit: "%".to_string(),
                error: None,
            },
        ]
    }
}
