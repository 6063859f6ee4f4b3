//! RS-232 adapter for ViX drives.
//!
//! Wraps the `serialport` crate and runs blocking serial I/O on Tokio's
//! blocking executor so workers awaiting a write never stall the runtime.
//! Commands are terminated with a carriage return; the moving/busy pair is
//! sampled with the `R(MV)` / `R(RB)` status report queries.

use super::{Adapter, StatusBits};
use crate::error::{AppResult, TraverserError};
use async_trait::async_trait;
use log::debug;
use serialport::SerialPort;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LINE_TERMINATOR: &str = "\r";
const RESPONSE_DELIMITER: u8 = b'\r';

pub struct SerialAdapter {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    pub fn new(port_name: String, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name,
            baud_rate,
            timeout,
            port: None,
        }
    }

    fn port_handle(&self) -> AppResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.clone().ok_or(TraverserError::NotConnected)
    }

    /// Writes `message` and reads one delimited reply.
    async fn query(&mut self, message: &str) -> AppResult<String> {
        let port = self.port_handle()?;
        let framed = format!("{message}{LINE_TERMINATOR}");
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{Read, Write};

            let mut guard = port
                .lock()
                .map_err(|_| TraverserError::Connection("serial port poisoned".to_string()))?;
            guard
                .write_all(framed.as_bytes())
                .map_err(|e| TraverserError::Connection(e.to_string()))?;
            guard
                .flush()
                .map_err(|e| TraverserError::Connection(e.to_string()))?;

            let mut response = String::new();
            let mut buffer = [0u8; 1];
            let start = std::time::Instant::now();
            loop {
                if start.elapsed() > timeout {
                    return Err(TraverserError::Connection(format!(
                        "Serial read timeout after {timeout:?}"
                    )));
                }
                match guard.read(&mut buffer) {
                    Ok(1) => {
                        if buffer[0] == RESPONSE_DELIMITER {
                            break;
                        }
                        response.push(buffer[0] as char);
                    }
                    Ok(_) => {
                        return Err(TraverserError::Connection(
                            "Unexpected EOF from serial port".to_string(),
                        ))
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(TraverserError::Connection(e.to_string())),
                }
            }
            Ok(response.trim().to_string())
        })
        .await
        .map_err(|e| TraverserError::Connection(format!("Serial I/O task panicked: {e}")))?
    }

    /// Parses a `*<bit>` status report reply.
    fn parse_bit(response: &str) -> bool {
        response.trim_start_matches('*').trim().starts_with('1')
    }
}

#[async_trait]
impl Adapter for SerialAdapter {
    fn describe(&self) -> String {
        self.port_name.clone()
    }

    async fn open(&mut self) -> AppResult<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.port_name, self.baud_rate)
            // Short internal timeout; the overall bound is enforced per read loop
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                TraverserError::Connection(format!(
                    "Failed to open serial port '{}' at {} baud: {e}",
                    self.port_name, self.baud_rate
                ))
            })?;
        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    async fn write_message(&mut self, message: &str) -> AppResult<()> {
        let port = self.port_handle()?;
        let framed = format!("{message}{LINE_TERMINATOR}");
        let logged = message.to_string();

        tokio::task::spawn_blocking(move || -> AppResult<()> {
            use std::io::Write;

            let mut guard = port
                .lock()
                .map_err(|_| TraverserError::Connection("serial port poisoned".to_string()))?;
            guard
                .write_all(framed.as_bytes())
                .map_err(|e| TraverserError::Connection(e.to_string()))?;
            guard
                .flush()
                .map_err(|e| TraverserError::Connection(e.to_string()))?;
            debug!("Sent serial command: {logged}");
            Ok(())
        })
        .await
        .map_err(|e| TraverserError::Connection(format!("Serial I/O task panicked: {e}")))?
    }

    async fn poll_status(&mut self, axis: u8) -> AppResult<StatusBits> {
        let moving = Self::parse_bit(&self.query(&format!("{axis}R(MV)")).await?);
        let busy = Self::parse_bit(&self.query(&format!("{axis}R(RB)")).await?);
        Ok(StatusBits { moving, busy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bit() {
        assert!(SerialAdapter::parse_bit("*1"));
        assert!(!SerialAdapter::parse_bit("*0"));
        assert!(SerialAdapter::parse_bit("1"));
        assert!(!SerialAdapter::parse_bit(""));
    }

    #[test]
    fn test_describe() {
        let adapter = SerialAdapter::new("/dev/ttyUSB0".to_string(), 9600, Duration::from_secs(1));
        assert_eq!(adapter.describe(), "/dev/ttyUSB0");
    }
}
