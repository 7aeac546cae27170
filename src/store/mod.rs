//! # Settings Store
//!
//! Holds the settings being edited, their validity, a dirty flag against the
//! last loaded snapshot, and the debounced write-back to the local cache.
//!
//! ## Lifecycle
//!
//! - [`SettingsStore::open`] pre-populates from the cache entry keyed `config`,
//!   falling back to schema defaults.
//! - [`SettingsStore::load`] replaces the value wholesale (device fetch, backup).
//! - [`SettingsStore::update`], [`SettingsStore::patch`] and the beacon helpers
//!   are the only field-level mutation paths.
//! - A valid edit (re)arms a single cache-write deadline; rapid edits coalesce
//!   into one write carrying the final state.
//!
//! Listeners registered with [`SettingsStore::subscribe`] see every change.
//!
//! ```rust
//! use std::time::Duration;
//! use trackerconf::settings::schema::Schema;
//! use trackerconf::store::{cache::MemoryCache, SettingsStore};
//!
//! let cache = MemoryCache::new();
//! let mut store = SettingsStore::open(Schema::default(), Box::new(cache.clone()), Duration::from_millis(1000));
//! store.update(|s| s.lora.power = 17);
//! store.flush_pending().unwrap();
//! assert_eq!(cache.writes(), 1);
//! ```

pub mod cache;

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::Value;

use crate::error::SyncError;
use crate::settings::schema::{self, FieldKind, Schema, ValidationReport};
use crate::settings::{Beacon, Settings};

use self::cache::{SettingsCache, CONFIG_KEY};

pub type SubscriptionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Value replaced wholesale.
    Loaded,
    /// Field-level edit.
    Updated,
    /// Current value persisted to the cache.
    CacheWritten,
}

#[derive(Debug)]
pub struct StoreEvent<'a> {
    pub change: Change,
    pub settings: &'a Settings,
    pub valid: bool,
}

type Listener = Box<dyn FnMut(&StoreEvent<'_>) + Send>;

pub struct SettingsStore {
    schema: Schema,
    current: Settings,
    report: ValidationReport,
    /// Last wholesale-loaded value; `current != baseline` means dirty.
    baseline: Settings,
    cache: Box<dyn SettingsCache>,
    debounce: Duration,
    flush_at: Option<Instant>,
    restored_from_cache: bool,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: SubscriptionId,
}

impl SettingsStore {
    /// Empty store holding schema defaults; the cache is not consulted.
    pub fn new(schema: Schema, cache: Box<dyn SettingsCache>, debounce: Duration) -> Self {
        let current = schema.default_value();
        let report = schema.validate(&current);
        Self {
            schema,
            baseline: current.clone(),
            current,
            report,
            cache,
            debounce,
            flush_at: None,
            restored_from_cache: false,
            listeners: Vec::new(),
            next_id: 1,
        }
    }

    /// Store pre-populated from the cached snapshot when one is readable.
    pub fn open(schema: Schema, cache: Box<dyn SettingsCache>, debounce: Duration) -> Self {
        let mut store = Self::new(schema, cache, debounce);
        match store.cache.read(CONFIG_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<Settings>(&json) {
                Ok(cached) => {
                    store.replace(cached);
                    store.restored_from_cache = true;
                    info!("Configuration loaded from cache");
                }
                Err(e) => warn!("Ignoring unreadable cached configuration: {}", e),
            },
            Ok(None) => debug!("No cached configuration; starting from defaults"),
            Err(e) => warn!("Failed to read configuration cache: {}", e),
        }
        store
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn settings(&self) -> &Settings {
        &self.current
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn is_valid(&self) -> bool {
        self.report.is_valid()
    }

    pub fn is_dirty(&self) -> bool {
        self.current != self.baseline
    }

    pub fn restored_from_cache(&self) -> bool {
        self.restored_from_cache
    }

    /// Treat the current value as the new baseline.
    pub fn mark_clean(&mut self) {
        self.baseline = self.current.clone();
    }

    /// Replace the value wholesale and notify listeners.
    pub fn load(&mut self, initial: Settings) {
        self.load_at(initial, Instant::now());
    }

    pub fn load_at(&mut self, initial: Settings, now: Instant) {
        self.replace(initial);
        self.schedule_write(now);
        self.notify(Change::Loaded);
    }

    fn replace(&mut self, next: Settings) {
        self.report = self.schema.validate(&next);
        self.baseline = next.clone();
        self.current = next;
    }

    pub fn update<F>(&mut self, mutator: F)
    where
        F: FnOnce(&mut Settings),
    {
        self.update_at(mutator, Instant::now());
    }

    /// Apply an edit as of `now`; a valid result (re)arms the cache write.
    pub fn update_at<F>(&mut self, mutator: F, now: Instant)
    where
        F: FnOnce(&mut Settings),
    {
        mutator(&mut self.current);
        self.report = self.schema.validate(&self.current);
        self.schedule_write(now);
        self.notify(Change::Updated);
    }

    fn schedule_write(&mut self, now: Instant) {
        if self.report.is_valid() {
            self.flush_at = Some(now + self.debounce);
        }
    }

    /// Merge a partial JSON object onto the current value. All or nothing.
    pub fn patch(&mut self, partial: &Value) -> Result<(), SyncError> {
        let mut tree = serde_json::to_value(&self.current)?;
        merge(&mut tree, partial);
        let next: Settings = serde_json::from_value(tree)?;
        self.update(|s| *s = next);
        Ok(())
    }

    /// Set one field from its textual form, e.g. `("lora.power", "17")`.
    pub fn set_field(&mut self, path: &str, raw: &str) -> Result<(), SyncError> {
        let spec = schema::field(path)
            .ok_or_else(|| SyncError::Serialization(format!("unknown field '{}'", path)))?;
        let leaf = parse_leaf(spec.kind, path, raw)?;
        let mut tree = serde_json::to_value(&self.current)?;
        let pointer = format!("/{}", path.replace('.', "/"));
        let slot = tree
            .pointer_mut(&pointer)
            .ok_or_else(|| SyncError::Serialization(format!("no such field '{}'", path)))?;
        *slot = leaf;
        let next: Settings = serde_json::from_value(tree)?;
        self.update(|s| *s = next);
        Ok(())
    }

    /// Append a default beacon. No-op at the schema's upper bound.
    pub fn add_beacon(&mut self) -> bool {
        if self.current.beacons.len() >= self.schema.max_beacons {
            debug!(
                "Beacon limit {} reached; add ignored",
                self.schema.max_beacons
            );
            return false;
        }
        self.update(|s| s.beacons.push(Beacon::default()));
        true
    }

    /// Remove the beacon at `index`. No-op when out of range.
    pub fn remove_beacon(&mut self, index: usize) -> bool {
        if index >= self.current.beacons.len() {
            return false;
        }
        self.update(|s| {
            s.beacons.remove(index);
        });
        true
    }

    /// Backup document, schema-identical to the wire settings.
    pub fn export_backup(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string_pretty(&self.current)?)
    }

    /// Replace the value from a backup document. A malformed document leaves the
    /// store untouched.
    pub fn import_backup(&mut self, raw: &str) -> Result<(), SyncError> {
        let parsed: Settings = serde_json::from_str(raw)?;
        self.load(parsed);
        Ok(())
    }

    /// Deadline of the pending cache write, if any.
    pub fn next_flush(&self) -> Option<Instant> {
        self.flush_at
    }

    /// Write the cache if the debounce deadline has passed. Returns whether a
    /// write happened.
    pub fn flush_due(&mut self, now: Instant) -> Result<bool, SyncError> {
        match self.flush_at {
            Some(deadline) if deadline <= now => {
                self.flush_at = None;
                self.write_cache()
            }
            _ => Ok(false),
        }
    }

    /// Write immediately if a write is pending.
    pub fn flush_pending(&mut self) -> Result<bool, SyncError> {
        if self.flush_at.take().is_some() {
            self.write_cache()
        } else {
            Ok(false)
        }
    }

    /// Wait for the pending deadline, then write.
    pub async fn settle(&mut self) -> Result<bool, SyncError> {
        let Some(deadline) = self.flush_at else {
            return Ok(false);
        };
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        self.flush_due(Instant::now().max(deadline))
    }

    fn write_cache(&mut self) -> Result<bool, SyncError> {
        if !self.report.is_valid() {
            debug!("Skipping cache write: settings are invalid ({})", self.report);
            return Ok(false);
        }
        let json = serde_json::to_string(&self.current)?;
        self.cache.write(CONFIG_KEY, &json)?;
        debug!("Cached configuration ({} bytes)", json.len());
        self.notify(Change::CacheWritten);
        Ok(true)
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent<'_>) + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    fn notify(&mut self, change: Change) {
        let event = StoreEvent {
            change,
            settings: &self.current,
            valid: self.report.is_valid(),
        };
        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}

/// Objects merge key by key; arrays merge by index over existing elements only.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        dst.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(dst), Value::Array(src)) => {
            for (slot, value) in dst.iter_mut().zip(src) {
                merge(slot, value);
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

fn parse_leaf(kind: FieldKind, path: &str, raw: &str) -> Result<Value, SyncError> {
    let bad = |what: &str| SyncError::Serialization(format!("{} expects {}, got '{}'", path, what, raw));
    match kind {
        FieldKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "off" | "no" => Ok(Value::Bool(false)),
            _ => Err(bad("a boolean")),
        },
        FieldKind::Int { .. } => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| bad("an integer")),
        FieldKind::Text { .. } => Ok(Value::String(raw.to_string())),
    }
}
