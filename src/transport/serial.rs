//! USB serial link to the tracker console.
//!
//! Port bring-up matches what ESP32 boards expect: 8N1, DTR/RTS asserted, a
//! short settle delay and a purge of the boot banner. Reads are short blocking
//! polls against the port timeout; complete lines come out of a [`LineFramer`].

use std::io::{Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use serialport::SerialPort;
use tokio::time::{sleep, Instant};

use crate::codec::framer::LineFramer;
use crate::error::TransportError;
use crate::logutil::preview;

use super::{Request, Transport, TransportKind};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Per-read poll window; kept short so the async caller can observe deadlines.
const READ_POLL: Duration = Duration::from_millis(50);
const SETTLE_DELAY: Duration = Duration::from_millis(150);

pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    framer: LineFramer,
}

impl SerialTransport {
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            port: None,
            framer: LineFramer::new(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }
        let mut builder = serialport::new(&self.port_name, self.baud_rate).timeout(READ_POLL);
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder.open().map_err(|e| TransportError::Open {
            target: self.port_name.clone(),
            reason: e.to_string(),
        })?;
        // ESP32 boards wake on DTR/RTS
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        sleep(SETTLE_DELAY).await;

        let mut purged = 0usize;
        let mut purge_buf = [0u8; 512];
        while let Ok(available) = port.bytes_to_read() {
            if available == 0 {
                break;
            }
            match port.read(&mut purge_buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => purged += n,
            }
        }
        debug!(
            "Serial port {} @ {} baud opened, purged {} startup bytes",
            self.port_name, self.baud_rate, purged
        );
        self.framer.clear();
        self.port = Some(port);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut port) = self.port.take() {
            let _ = port.write_data_terminal_ready(false);
            debug!("Serial port {} closed", self.port_name);
        }
        self.framer.clear();
        Ok(())
    }

    async fn send(&mut self, request: Request) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        debug!("serial tx [{}] {}", request.mode, preview(&request.payload));
        port.write_all(request.payload.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buffer = [0u8; 1024];
        loop {
            if let Some(line) = self.framer.next_line() {
                trace!("serial rx {}", preview(&line));
                return Ok(line);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout(timeout));
            }
            let port = self.port.as_mut().ok_or(TransportError::Closed)?;
            match port.read(&mut buffer) {
                Ok(n) if n > 0 => self.framer.push(&buffer[..n]),
                Ok(_) => sleep(Duration::from_millis(10)).await,
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // No data within the poll window
                    sleep(Duration::from_millis(1)).await;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    debug!("Serial read interrupted (EINTR)");
                    sleep(Duration::from_millis(5)).await;
                }
                Err(e) => {
                    warn!("Serial read error on {}: {}", self.port_name, e);
                    return Err(TransportError::Io(e));
                }
            }
        }
    }

    /// A serial link is alive as long as the port is open.
    async fn probe(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        if self.port.is_some() {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

/// Names of serial ports present on this machine.
pub fn available_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unopened_port_is_closed() {
        let mut transport = SerialTransport::new("/dev/does-not-exist", DEFAULT_BAUD_RATE);
        assert_eq!(transport.kind(), TransportKind::Serial);
        assert!(matches!(
            transport.send(Request::read(TransportKind::Serial)).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.probe(Duration::from_millis(10)).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn open_missing_port_reports_target() {
        let mut transport = SerialTransport::new("/dev/does-not-exist", DEFAULT_BAUD_RATE);
        match transport.open().await {
            Err(TransportError::Open { target, .. }) => assert_eq!(target, "/dev/does-not-exist"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
