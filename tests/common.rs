//! Shared fixtures for the sync integration tests.

use std::time::Duration;

use trackerconf::settings::schema::Schema;
use trackerconf::settings::{Beacon, Settings};
use trackerconf::store::cache::MemoryCache;
use trackerconf::store::SettingsStore;
use trackerconf::sync::{SyncController, SyncOptions};
use trackerconf::transport::mock::MockTransport;

/// Millisecond-scale timings so failure paths finish quickly.
#[allow(dead_code)]
pub fn fast_options() -> SyncOptions {
    SyncOptions {
        reply_timeout: Duration::from_millis(100),
        status_initial_delay: Duration::from_millis(5),
        status_attempt_timeout: Duration::from_millis(10),
        status_max_attempts: 4,
        status_backoff: Duration::from_millis(2),
        status_backoff_max: Duration::from_millis(5),
    }
}

#[allow(dead_code)]
pub fn controller(transport: MockTransport, schema: Schema, cache: &MemoryCache) -> SyncController {
    let store = SettingsStore::new(schema, Box::new(cache.clone()), Duration::from_millis(1000));
    SyncController::new(Box::new(transport), store, fast_options())
}

/// A tracker that has clearly been configured by someone.
#[allow(dead_code)]
pub fn configured_device() -> Settings {
    let mut settings = Settings::default();
    settings.beacons[0].callsign = "EA1ABC-7".to_string();
    settings.beacons[0].comment = "LoRa tracker".to_string();
    settings.beacons.push(Beacon {
        callsign: "EA1ABC-9".to_string(),
        symbol: "[".to_string(),
        comment: "on foot".to_string(),
        ..Beacon::default()
    });
    settings.lora.frequency = 433_900_000;
    settings.lora.power = 14;
    settings.other.path = "WIDE2-1".to_string();
    settings.bme.active = true;
    settings
}
