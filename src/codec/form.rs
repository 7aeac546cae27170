//! HTTP form encoding used by the device's admin page.
//!
//! The settings tree is flattened into dotted, indexed keys
//! (`beacons.0.callsign`, `lora.frequency`). Booleans follow checkbox rules: a
//! true flag is submitted as `key=1`, a false flag is left out, and a missing key
//! decodes as false.
//!
//! Field bindings are generated from the schema table rather than written out per
//! field, so the encoder, decoder and the CLI listing can never drift apart.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::settings::schema::{self, FieldKind, FieldSpec, FIELDS};
use crate::settings::Settings;

/// Value submitted for a checked box.
pub const CHECKED: &str = "1";

/// One concrete form input derived from a schema field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBinding {
    /// Input name, e.g. `beacons.1.smart_beacon.turnSlope`.
    pub name: String,
    pub spec: &'static FieldSpec,
    pub value: Value,
}

impl FieldBinding {
    /// Checkbox state; false for non-boolean fields.
    pub fn checked(&self) -> bool {
        matches!(self.spec.kind, FieldKind::Bool) && self.value.as_bool() == Some(true)
    }

    /// Text an input element would carry.
    pub fn display_value(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Bindings for every field of `settings`, beacons first, in schema order.
pub fn bindings(settings: &Settings) -> Result<Vec<FieldBinding>, ProtocolError> {
    let tree = serde_json::to_value(settings).map_err(ProtocolError::malformed)?;
    let mut out = Vec::new();
    for index in 0..settings.beacons.len() {
        for spec in FIELDS.iter().filter(|f| f.per_beacon()) {
            let name = spec.concrete_path(index);
            let value = schema::lookup(&tree, &name).cloned().unwrap_or(Value::Null);
            out.push(FieldBinding { name, spec, value });
        }
    }
    for spec in FIELDS.iter().filter(|f| !f.per_beacon()) {
        let value = schema::lookup(&tree, spec.path).cloned().unwrap_or(Value::Null);
        out.push(FieldBinding {
            name: spec.path.to_string(),
            spec,
            value,
        });
    }
    Ok(out)
}

/// Form pairs as a browser would submit them.
pub fn encode(settings: &Settings) -> Result<Vec<(String, String)>, ProtocolError> {
    let mut pairs = Vec::new();
    for binding in bindings(settings)? {
        match binding.spec.kind {
            FieldKind::Bool => {
                if binding.checked() {
                    pairs.push((binding.name, CHECKED.to_string()));
                }
            }
            FieldKind::Int { .. } | FieldKind::Text { .. } => {
                let value = binding.display_value();
                pairs.push((binding.name, value));
            }
        }
    }
    Ok(pairs)
}

/// `application/x-www-form-urlencoded` body for `pairs`.
pub fn to_body(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Split a urlencoded body into decoded pairs. `+` is a space.
pub fn parse_body(body: &str) -> Result<Vec<(String, String)>, ProtocolError> {
    let unescape = |raw: &str| {
        let spaced = raw.replace('+', " ");
        urlencoding::decode(&spaced)
            .map(|s| s.into_owned())
            .map_err(|e| ProtocolError::malformed(format!("bad escape in '{}': {}", raw, e)))
    };
    body.trim()
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            Ok((unescape(k)?, unescape(v)?))
        })
        .collect()
}

/// Rebuild settings from a submitted form body.
pub fn decode(body: &str) -> Result<Settings, ProtocolError> {
    let submitted: HashMap<String, String> = parse_body(body)?.into_iter().collect();

    let beacon_count = beacon_count(&submitted)?;

    let mut beacons = Vec::new();
    for index in 0..beacon_count {
        let mut beacon = Value::Object(Map::new());
        for spec in FIELDS.iter().filter(|f| f.per_beacon()) {
            let name = spec.concrete_path(index);
            let leaf = read_field(spec, &name, &submitted)?;
            let relative = spec
                .path
                .strip_prefix("beacons.*.")
                .unwrap_or(spec.path);
            insert_path(&mut beacon, relative, leaf);
        }
        beacons.push(beacon);
    }

    let mut root = Value::Object(Map::new());
    insert_path(&mut root, "beacons", Value::Array(beacons));
    for spec in FIELDS.iter().filter(|f| !f.per_beacon()) {
        let leaf = read_field(spec, spec.path, &submitted)?;
        insert_path(&mut root, spec.path, leaf);
    }

    serde_json::from_value(root).map_err(ProtocolError::malformed)
}

/// Highest submitted beacon index plus one. Every beacon contributes at least
/// one key, so an index at or past the number of keys cannot be genuine.
fn beacon_count(submitted: &HashMap<String, String>) -> Result<usize, ProtocolError> {
    let mut count = 0usize;
    for rest in submitted.keys().filter_map(|k| k.strip_prefix("beacons.")) {
        let Some(index) = rest.split('.').next().and_then(|i| i.parse::<usize>().ok()) else {
            continue;
        };
        if index >= submitted.len() {
            return Err(ProtocolError::malformed(format!(
                "beacon index {} out of range",
                index
            )));
        }
        count = count.max(index.saturating_add(1));
    }
    Ok(count)
}

fn read_field(
    spec: &FieldSpec,
    name: &str,
    submitted: &HashMap<String, String>,
) -> Result<Value, ProtocolError> {
    match spec.kind {
        FieldKind::Bool => Ok(Value::Bool(submitted.contains_key(name))),
        FieldKind::Int { .. } => {
            let raw = submitted
                .get(name)
                .ok_or_else(|| ProtocolError::malformed(format!("missing field {}", name)))?;
            let n: i64 = raw.trim().parse().map_err(|_| {
                ProtocolError::malformed(format!("{} is not an integer: '{}'", name, raw))
            })?;
            Ok(Value::from(n))
        }
        FieldKind::Text { .. } => submitted
            .get(name)
            .map(|s| Value::String(s.clone()))
            .ok_or_else(|| ProtocolError::malformed(format!("missing field {}", name))),
    }
}

fn insert_path(node: &mut Value, path: &str, leaf: Value) {
    let Value::Object(map) = node else { return };
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), leaf);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            insert_path(child, rest, leaf);
        }
    }
}
