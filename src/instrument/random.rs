//! Random number generator test instrument.
//!
//! Single unitless channel of random integers, useful for exercising the
//! program logger without hardware.

use super::{disconnected_reading, Acquisition, Channel, Instrument};
use crate::error::AppResult;
use async_trait::async_trait;
use rand::Rng;

const CHANNELS: &[(&str, &str)] = &[("random_number", "")];

#[derive(Default)]
pub struct RandomNumberGenerator {
    connected: bool,
}

impl RandomNumberGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Instrument for RandomNumberGenerator {
    fn name(&self) -> &str {
        "Random Number Generator"
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
        vec![Channel {
            id: "random_number".to_string(),
            value: Some(rand::thread_rng().gen_range(0..=1000) as f64),
            unit: String::new(),
            error: None,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_range() {
        let mut rng = RandomNumberGenerator::new();
        rng.connect().await.unwrap();
        let reading = rng.acquire().await;
        assert_eq!(reading.len(), 1);
        let value = reading[0].value.unwrap();
        assert!((0.0..=1000.0).contains(&value));
        assert!(reading[0].unit.is_empty());
    }
}
