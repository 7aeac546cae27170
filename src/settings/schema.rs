//! Static description of every settings field and the pure validation over it.
//!
//! The table in [`FIELDS`] is the single source of truth for field kinds and
//! ranges. The form codec walks the same table, so a field added here shows up in
//! validation, form encoding and the CLI listing at once.

use std::fmt;

use serde_json::Value;

use super::{Beacon, Settings};

/// Beacons required for a settings object to be valid.
///
/// Older form revisions refused an empty beacon list and later ones accepted it.
/// Defaulting to one keeps the stricter behaviour; configuration may lower it.
pub const DEFAULT_MIN_BEACONS: usize = 1;

/// The firmware stores at most this many beacon profiles.
pub const DEFAULT_MAX_BEACONS: usize = 3;

/// Placeholder used for the beacon index in [`FieldSpec::path`].
pub const INDEX_PLACEHOLDER: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int { min: i64, max: i64 },
    Text { min_len: usize, max_len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Dotted path; beacon fields use `*` for the index.
    pub path: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    const fn flag(path: &'static str) -> Self {
        Self { path, kind: FieldKind::Bool }
    }

    const fn int(path: &'static str, min: i64, max: i64) -> Self {
        Self { path, kind: FieldKind::Int { min, max } }
    }

    const fn text(path: &'static str, min_len: usize, max_len: usize) -> Self {
        Self { path, kind: FieldKind::Text { min_len, max_len } }
    }

    /// Top-level group the field belongs to (`lora`, `beacons`, ...).
    pub fn group(&self) -> &'static str {
        self.path.split('.').next().unwrap_or(self.path)
    }

    /// True for fields repeated once per beacon.
    pub fn per_beacon(&self) -> bool {
        self.group() == "beacons"
    }

    /// Concrete path for beacon `index`; non-beacon paths are returned as-is.
    pub fn concrete_path(&self, index: usize) -> String {
        self.path.replacen(INDEX_PLACEHOLDER, &index.to_string(), 1)
    }
}

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::text("beacons.*.callsign", 1, 9),
    FieldSpec::text("beacons.*.symbol", 1, 1),
    FieldSpec::text("beacons.*.overlay", 1, 1),
    FieldSpec::text("beacons.*.comment", 0, 40),
    FieldSpec::flag("beacons.*.smart_beacon.active"),
    FieldSpec::int("beacons.*.smart_beacon.slowRate", 0, 65535),
    FieldSpec::int("beacons.*.smart_beacon.slowSpeed", 0, 65535),
    FieldSpec::int("beacons.*.smart_beacon.fastRate", 0, 65535),
    FieldSpec::int("beacons.*.smart_beacon.fastSpeed", 0, 65535),
    FieldSpec::int("beacons.*.smart_beacon.minTxDist", 0, 65535),
    FieldSpec::int("beacons.*.smart_beacon.minDeltaBeacon", 0, 65535),
    FieldSpec::int("beacons.*.smart_beacon.turnMinDeg", 0, 360),
    FieldSpec::int("beacons.*.smart_beacon.turnSlope", 0, 360),
    FieldSpec::int("lora.frequency", 100_000_000, 3_000_000_000),
    FieldSpec::int("lora.spreadingFactor", 7, 12),
    FieldSpec::int("lora.signalBandwidth", 125_000, 500_000),
    FieldSpec::int("lora.codingRate4", 5, 8),
    FieldSpec::int("lora.power", 0, 20),
    FieldSpec::flag("other.sendAltitude"),
    FieldSpec::flag("other.sendBatteryInfo"),
    FieldSpec::flag("other.showSymbolOnScreen"),
    FieldSpec::flag("other.displayEcoMode"),
    FieldSpec::flag("other.bluetooth"),
    FieldSpec::flag("other.disableGps"),
    FieldSpec::flag("other.simplifiedTrackerMode"),
    FieldSpec::text("other.path", 1, 9),
    FieldSpec::int("other.sendCommentAfterXBeacons", 0, 65535),
    FieldSpec::int("other.displayTimeout", 10, 65535),
    FieldSpec::int("other.standingUpdateTime", 0, 65535),
    FieldSpec::int("other.nonSmartBeaconRate", 1, 65535),
    FieldSpec::int("other.rememberStationTime", 1, 65535),
    FieldSpec::int("other.maxDistanceToTracker", 1, 65535),
    FieldSpec::flag("pttTrigger.active"),
    FieldSpec::flag("pttTrigger.reverse"),
    FieldSpec::int("pttTrigger.io_pin", 0, 30),
    FieldSpec::int("pttTrigger.preDelay", 0, 65535),
    FieldSpec::int("pttTrigger.postDelay", 0, 65535),
    FieldSpec::flag("bme.active"),
    FieldSpec::flag("bme.sendTelemetry"),
    FieldSpec::int("bme.heightCorrection", 0, 65535),
    FieldSpec::flag("notification.ledTx"),
    FieldSpec::int("notification.ledTxPin", 0, 40),
    FieldSpec::flag("notification.ledMessage"),
    FieldSpec::int("notification.ledMessagePin", 0, 40),
    FieldSpec::flag("notification.buzzerActive"),
    FieldSpec::int("notification.buzzerPinTone", 0, 40),
    FieldSpec::int("notification.buzzerPinVcc", 0, 40),
    FieldSpec::flag("notification.bootUpBeep"),
    FieldSpec::flag("notification.txBeep"),
    FieldSpec::flag("notification.messageRxBeep"),
    FieldSpec::flag("notification.stationBeep"),
    FieldSpec::flag("notification.lowBatteryBeep"),
];

/// Look up the field definition for a concrete path such as `beacons.2.comment`.
pub fn field(path: &str) -> Option<&'static FieldSpec> {
    let generic = generic_path(path);
    FIELDS.iter().find(|f| f.path == generic)
}

/// Replace numeric path segments with the index placeholder.
pub(crate) fn generic_path(path: &str) -> String {
    path.split('.')
        .map(|seg| {
            if !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()) {
                INDEX_PLACEHOLDER
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Resolve a dotted path inside a JSON tree; numeric segments index arrays.
pub(crate) fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, seg| match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Why a field failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Missing,
    WrongKind { expected: &'static str },
    BelowMin { min: i64 },
    AboveMax { max: i64 },
    TooShort { min_len: usize },
    TooLong { max_len: usize },
    TooFewBeacons { min: usize },
    TooManyBeacons { max: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Missing => write!(f, "required"),
            Violation::WrongKind { expected } => write!(f, "expected {}", expected),
            Violation::BelowMin { min } => write!(f, "must be >= {}", min),
            Violation::AboveMax { max } => write!(f, "must be <= {}", max),
            Violation::TooShort { min_len } => write!(f, "must be at least {} characters", min_len),
            Violation::TooLong { max_len } => write!(f, "must be at most {} characters", max_len),
            Violation::TooFewBeacons { min } => write!(f, "at least {} beacon(s) required", min),
            Violation::TooManyBeacons { max } => write!(f, "at most {} beacon(s) allowed", max),
        }
    }
}

/// Outcome for a single concrete field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldResult {
    pub path: String,
    pub violation: Option<Violation>,
}

impl FieldResult {
    pub fn is_ok(&self) -> bool {
        self.violation.is_none()
    }
}

/// Per-field results; overall validity is the AND of all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub fields: Vec<FieldResult>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.fields.iter().all(FieldResult::is_ok)
    }

    pub fn violations(&self) -> impl Iterator<Item = &FieldResult> {
        self.fields.iter().filter(|r| !r.is_ok())
    }

    /// Result for a concrete path, if that path was checked.
    pub fn get(&self, path: &str) -> Option<&FieldResult> {
        self.fields.iter().find(|r| r.path == path)
    }

    fn push(&mut self, path: impl Into<String>, violation: Option<Violation>) {
        self.fields.push(FieldResult { path: path.into(), violation });
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failures: Vec<_> = self.violations().collect();
        if failures.is_empty() {
            return write!(f, "all fields valid");
        }
        const SHOWN: usize = 3;
        let listed = failures
            .iter()
            .take(SHOWN)
            .map(|r| match &r.violation {
                Some(v) => format!("{} {}", r.path, v),
                None => r.path.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        if failures.len() > SHOWN {
            write!(f, "{} (+{} more)", listed, failures.len() - SHOWN)
        } else {
            write!(f, "{}", listed)
        }
    }
}

/// Validation policy plus the static field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub min_beacons: usize,
    pub max_beacons: usize,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            min_beacons: DEFAULT_MIN_BEACONS,
            max_beacons: DEFAULT_MAX_BEACONS,
        }
    }
}

impl Schema {
    pub fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    /// Fully populated instance that passes [`Schema::validate`].
    pub fn default_value(&self) -> Settings {
        let count = self.min_beacons.max(1).min(self.max_beacons.max(1));
        Settings {
            beacons: vec![Beacon::default(); count],
            ..Settings::default()
        }
    }

    pub fn validate(&self, candidate: &Settings) -> ValidationReport {
        match serde_json::to_value(candidate) {
            Ok(value) => self.validate_value(&value),
            // Plain structs of strings and integers always serialize.
            Err(_) => {
                let mut report = ValidationReport::default();
                report.push("", Some(Violation::WrongKind { expected: "object" }));
                report
            }
        }
    }

    /// Validate a raw JSON candidate, reporting missing fields and wrong kinds too.
    pub fn validate_value(&self, candidate: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();

        match candidate.get("beacons") {
            Some(Value::Array(beacons)) => {
                let count_violation = if beacons.len() < self.min_beacons {
                    Some(Violation::TooFewBeacons { min: self.min_beacons })
                } else if beacons.len() > self.max_beacons {
                    Some(Violation::TooManyBeacons { max: self.max_beacons })
                } else {
                    None
                };
                report.push("beacons", count_violation);
                for index in 0..beacons.len() {
                    for spec in FIELDS.iter().filter(|f| f.per_beacon()) {
                        let path = spec.concrete_path(index);
                        let violation = check(spec.kind, lookup(candidate, &path));
                        report.push(path, violation);
                    }
                }
            }
            Some(_) => report.push("beacons", Some(Violation::WrongKind { expected: "array" })),
            None => report.push("beacons", Some(Violation::Missing)),
        }

        for spec in FIELDS.iter().filter(|f| !f.per_beacon()) {
            let violation = check(spec.kind, lookup(candidate, spec.path));
            report.push(spec.path, violation);
        }

        report
    }
}

fn check(kind: FieldKind, value: Option<&Value>) -> Option<Violation> {
    let value = match value {
        None | Some(Value::Null) => return Some(Violation::Missing),
        Some(v) => v,
    };
    match kind {
        FieldKind::Bool => {
            if value.is_boolean() {
                None
            } else {
                Some(Violation::WrongKind { expected: "boolean" })
            }
        }
        FieldKind::Int { min, max } => {
            if let Some(n) = value.as_i64() {
                if n < min {
                    Some(Violation::BelowMin { min })
                } else if n > max {
                    Some(Violation::AboveMax { max })
                } else {
                    None
                }
            } else if value.as_u64().is_some() {
                // Larger than i64::MAX, so certainly above any declared maximum.
                Some(Violation::AboveMax { max })
            } else {
                Some(Violation::WrongKind { expected: "integer" })
            }
        }
        FieldKind::Text { min_len, max_len } => match value.as_str() {
            Some(s) => {
                let len = s.chars().count();
                if len < min_len {
                    Some(Violation::TooShort { min_len })
                } else if len > max_len {
                    Some(Violation::TooLong { max_len })
                } else {
                    None
                }
            }
            None => Some(Violation::WrongKind { expected: "string" }),
        },
    }
}

/// Flatten a JSON tree into `(dotted path, leaf)` pairs in document order.
#[cfg(test)]
fn leaves(value: &Value) -> Vec<(String, &Value)> {
    fn walk<'a>(prefix: &str, value: &'a Value, out: &mut Vec<(String, &'a Value)>) {
        let join = |key: &str| {
            if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{}.{}", prefix, key)
            }
        };
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    walk(&join(key), child, out);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    walk(&join(&i.to_string()), child, out);
                }
            }
            leaf => out.push((prefix.to_string(), leaf)),
        }
    }
    let mut out = Vec::new();
    walk("", value, &mut out);
    out
}
