//! # Settings Codec
//!
//! Converts [`Settings`] to and from the device's wire representations. The
//! serial link uses single-line opcode commands; the HTTP admin page reads a JSON
//! document and writes a urlencoded form. Read and write shapes differ on HTTP,
//! so each direction is selected explicitly through [`Mode`].
//!
//! ```rust
//! use trackerconf::codec::{self, Decoded, Mode};
//! use trackerconf::settings::Settings;
//!
//! let line = codec::encode(&Settings::default(), Mode::SerialSet).unwrap();
//! assert!(line.starts_with('s'));
//! assert_eq!(codec::decode("s1", Mode::SerialSet).unwrap(), Decoded::Ack(true));
//! ```

pub mod form;
pub mod framer;
pub mod serial;

use std::fmt;

use crate::error::ProtocolError;
use crate::settings::Settings;

/// Wire shape selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// `g` request / `g<json>` reply.
    SerialGet,
    /// `s<json>` request / `s1`|`s0` reply.
    SerialSet,
    /// JSON document served at `/configuration.json`.
    HttpRead,
    /// Urlencoded form posted to the admin page.
    HttpWrite,
}

impl Mode {
    pub fn is_serial(self) -> bool {
        matches!(self, Mode::SerialGet | Mode::SerialSet)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::SerialGet => "serial-get",
            Mode::SerialSet => "serial-set",
            Mode::HttpRead => "http-read",
            Mode::HttpWrite => "http-write",
        };
        f.write_str(name)
    }
}

/// What a device payload turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Settings(Settings),
    /// Serial `s1` (true) or `s0` (false).
    Ack(bool),
}

impl Decoded {
    pub fn into_settings(self) -> Option<Settings> {
        match self {
            Decoded::Settings(s) => Some(s),
            Decoded::Ack(_) => None,
        }
    }
}

/// Encode `settings` for `mode`. `SerialGet` ignores the settings.
pub fn encode(settings: &Settings, mode: Mode) -> Result<String, ProtocolError> {
    match mode {
        Mode::SerialGet => Ok(serial::encode_get()),
        Mode::SerialSet => serial::encode_set(settings),
        Mode::HttpRead => serde_json::to_string(settings).map_err(ProtocolError::malformed),
        Mode::HttpWrite => Ok(form::to_body(&form::encode(settings)?)),
    }
}

/// Decode a raw device payload for `mode`.
///
/// Serial modes branch on the line's opcode, so either serial mode accepts both
/// a settings reply and an acknowledgment.
pub fn decode(raw: &str, mode: Mode) -> Result<Decoded, ProtocolError> {
    match mode {
        Mode::SerialGet | Mode::SerialSet => serial::decode_line(raw),
        Mode::HttpRead => serde_json::from_str(raw.trim())
            .map(Decoded::Settings)
            .map_err(ProtocolError::malformed),
        Mode::HttpWrite => form::decode(raw).map(Decoded::Settings),
    }
}
