//! # Transport Adapter
//!
//! A uniform byte-level channel to the tracker. The sync controller only sees
//! [`Transport`]; which physical link sits behind it decides the codec modes
//! through [`TransportKind`].
//!
//! Backends:
//! - [`serial::SerialTransport`]: USB serial console (feature `serial`)
//! - [`http::HttpTransport`]: Wi-Fi admin page (feature `http`)
//! - [`mock::MockTransport`]: scripted in-process device used by tests

#[cfg(feature = "http")]
pub mod http;
pub mod mock;
#[cfg(feature = "serial")]
pub mod serial;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::codec::{self, Mode};
use crate::error::{ProtocolError, TransportError};
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Serial,
    Http,
}

impl TransportKind {
    pub fn read_mode(self) -> Mode {
        match self {
            TransportKind::Serial => Mode::SerialGet,
            TransportKind::Http => Mode::HttpRead,
        }
    }

    pub fn write_mode(self) -> Mode {
        match self {
            TransportKind::Serial => Mode::SerialSet,
            TransportKind::Http => Mode::HttpWrite,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Serial => f.write_str("serial"),
            TransportKind::Http => f.write_str("http"),
        }
    }
}

/// An encoded payload tagged with the mode it was encoded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub mode: Mode,
    pub payload: String,
}

impl Request {
    /// "Send me your settings" for `kind`. HTTP reads carry no body.
    pub fn read(kind: TransportKind) -> Self {
        let mode = kind.read_mode();
        let payload = match kind {
            TransportKind::Serial => codec::serial::encode_get(),
            TransportKind::Http => String::new(),
        };
        Request { mode, payload }
    }

    pub fn write(kind: TransportKind, settings: &Settings) -> Result<Self, ProtocolError> {
        let mode = kind.write_mode();
        Ok(Request {
            mode,
            payload: codec::encode(settings, mode)?,
        })
    }
}

#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    async fn open(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    async fn send(&mut self, request: Request) -> Result<(), TransportError>;

    /// Next inbound payload: one line on serial, one response body on HTTP.
    async fn receive(&mut self, timeout: Duration) -> Result<String, TransportError>;

    /// Cheap liveness check; used to detect that the device came back after a
    /// write.
    async fn probe(&mut self, timeout: Duration) -> Result<(), TransportError>;
}
