//! Serial line protocol.
//!
//! | Direction | Line       | Meaning                  |
//! |-----------|------------|--------------------------|
//! | host → device | `g`        | request current settings |
//! | device → host | `g<json>`  | full settings            |
//! | host → device | `s<json>`  | apply settings           |
//! | device → host | `s1` / `s0`| applied / failed         |

use crate::error::ProtocolError;
use crate::settings::Settings;

use super::Decoded;

pub const OP_GET: char = 'g';
pub const OP_SET: char = 's';

pub fn encode_get() -> String {
    format!("{}\n", OP_GET)
}

pub fn encode_set(settings: &Settings) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(settings).map_err(ProtocolError::malformed)?;
    Ok(format!("{}{}\n", OP_SET, json))
}

/// Decode one device line, branching on its opcode.
pub fn decode_line(line: &str) -> Result<Decoded, ProtocolError> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let mut chars = line.chars();
    match chars.next() {
        None => Err(ProtocolError::EmptyLine),
        Some(OP_GET) => {
            let settings: Settings =
                serde_json::from_str(chars.as_str()).map_err(ProtocolError::malformed)?;
            Ok(Decoded::Settings(settings))
        }
        Some(OP_SET) => match chars.next() {
            Some('1') => Ok(Decoded::Ack(true)),
            Some('0') => Ok(Decoded::Ack(false)),
            Some(other) => Err(ProtocolError::malformed(format!(
                "unexpected status flag '{}'",
                other
            ))),
            None => Err(ProtocolError::malformed("missing status flag")),
        },
        Some(other) => Err(ProtocolError::UnrecognizedOpcode(other)),
    }
}
