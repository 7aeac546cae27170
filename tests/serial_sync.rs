//! Serial link lifecycle against the scripted tracker.

mod common;

use tokio_test::{assert_err, assert_ok};
use trackerconf::codec::Mode;
use trackerconf::settings::schema::{Schema, Violation};
use trackerconf::settings::Settings;
use trackerconf::store::cache::{MemoryCache, CONFIG_KEY};
use trackerconf::sync::SyncState;
use trackerconf::transport::mock::MockTransport;
use trackerconf::SyncError;

use common::{configured_device, controller};

#[tokio::test]
async fn connect_loads_device_settings_and_caches_them() {
    let device = configured_device();
    let (transport, handle) = MockTransport::serial(device.clone());
    let cache = MemoryCache::new();
    let mut sync = controller(transport, Schema::default(), &cache);

    assert_eq!(assert_ok!(sync.connect().await), SyncState::Connected);
    assert_eq!(sync.store().settings(), &device);
    assert!(sync.store().is_valid());
    assert!(!sync.store().is_dirty());
    assert_eq!(sync.device_settings(), Some(&device));

    let sent = handle.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].mode, Mode::SerialGet);
    assert_eq!(sent[0].payload, "g\n");

    assert_ok!(sync.store_mut().flush_pending());
    let cached: Settings = serde_json::from_str(&cache.get(CONFIG_KEY).unwrap()).unwrap();
    assert_eq!(cached, device);
}

#[tokio::test]
async fn console_chatter_before_reply_is_skipped() {
    let (transport, handle) = MockTransport::serial(configured_device());
    handle.chatter(["[GPS] no fix", "Battery: 4.02V", "[LoRa] rx ok"]);
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());

    assert_ok!(sync.connect().await);
    assert_eq!(sync.store().settings().beacons[0].callsign, "EA1ABC-7");
}

#[tokio::test]
async fn empty_beacon_list_is_invalid_under_default_policy() {
    let mut device = Settings::default();
    device.beacons.clear();
    let (transport, _handle) = MockTransport::serial(device);
    let cache = MemoryCache::new();
    let mut sync = controller(transport, Schema::default(), &cache);

    assert_ok!(sync.connect().await);
    assert!(sync.store().settings().beacons.is_empty());
    assert!(!sync.store().is_valid());
    assert_eq!(
        sync.store().report().get("beacons").unwrap().violation,
        Some(Violation::TooFewBeacons { min: 1 })
    );
    // Invalid settings are never cached nor sent back.
    assert_ok!(sync.store_mut().flush_pending());
    assert_eq!(cache.writes(), 0);
    assert!(matches!(
        sync.save_current().await,
        Err(SyncError::Validation(_))
    ));
}

#[tokio::test]
async fn empty_beacon_list_is_valid_when_allowed() {
    let mut device = Settings::default();
    device.beacons.clear();
    let (transport, _handle) = MockTransport::serial(device);
    let schema = Schema {
        min_beacons: 0,
        ..Schema::default()
    };
    let mut sync = controller(transport, schema, &MemoryCache::new());

    assert_ok!(sync.connect().await);
    assert!(sync.store().is_valid());
}

#[tokio::test]
async fn save_reflects_device_normalization() {
    let (transport, handle) = MockTransport::serial(configured_device());
    // Firmware snaps the frequency to a 1 kHz grid.
    handle.normalize_with(|s| s.lora.frequency = (s.lora.frequency + 500) / 1000 * 1000);
    let (tx, mut notices) = tokio::sync::mpsc::unbounded_channel();
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new()).with_notices(tx);
    assert_ok!(sync.connect().await);

    sync.store_mut().update(|s| s.lora.frequency = 433_775_321);
    assert!(sync.store().is_dirty());
    assert_ok!(sync.save_current().await);

    assert_eq!(sync.state(), SyncState::Connected);
    assert_eq!(handle.device().lora.frequency, 433_775_000);
    assert_eq!(sync.store().settings().lora.frequency, 433_775_000);
    assert!(!sync.store().is_dirty());

    let modes: Vec<Mode> = handle.sent().iter().map(|r| r.mode).collect();
    assert_eq!(modes, vec![Mode::SerialGet, Mode::SerialSet, Mode::SerialGet]);
    assert!(handle.sent()[1].payload.starts_with("s{\"beacons\":"));

    let mut messages = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        messages.push(notice.message);
    }
    assert!(messages.contains(&"Transfer successful".to_string()));
}

#[tokio::test]
async fn rejected_save_stays_connected() {
    let (transport, handle) = MockTransport::serial(configured_device());
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());
    assert_ok!(sync.connect().await);
    handle.reject_writes(true);

    sync.store_mut().update(|s| s.lora.power = 5);
    let err = assert_err!(sync.save_current().await);
    assert!(matches!(err, SyncError::Rejected));
    assert_eq!(sync.state(), SyncState::Connected);
    assert_eq!(handle.device().lora.power, 14);
    assert!(sync.store().is_dirty());
}

#[tokio::test]
async fn silent_device_times_out_on_ack() {
    let (transport, handle) = MockTransport::serial(configured_device());
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());
    assert_ok!(sync.connect().await);
    handle.silence(true);

    let err = assert_err!(sync.save_current().await);
    assert!(matches!(err, SyncError::Timeout(_)));
    assert_eq!(sync.state(), SyncState::Connected);
}

#[tokio::test]
async fn malformed_ack_is_a_protocol_error() {
    let (transport, handle) = MockTransport::serial(configured_device());
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());
    assert_ok!(sync.connect().await);
    handle.silence(true);
    handle.push_inbound("sx");

    let err = assert_err!(sync.save_current().await);
    assert!(matches!(err, SyncError::Protocol(_)));
    assert_eq!(sync.state(), SyncState::Connected);
}

#[tokio::test]
async fn lost_link_during_save_disconnects() {
    let (transport, handle) = MockTransport::serial(configured_device());
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());
    assert_ok!(sync.connect().await);
    handle.fail_send(true);

    let err = assert_err!(sync.save_current().await);
    assert!(matches!(err, SyncError::Transfer(_)));
    assert_eq!(sync.state(), SyncState::Disconnected);
    assert!(!handle.is_open());
    assert!(sync.device_settings().is_none());
}

#[tokio::test]
async fn silent_device_fails_connect() {
    let (transport, handle) = MockTransport::serial(configured_device());
    handle.silence(true);
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());

    let err = assert_err!(sync.connect().await);
    assert!(matches!(err, SyncError::Timeout(_)));
    assert_eq!(sync.state(), SyncState::Disconnected);
    assert!(!handle.is_open());
}

#[tokio::test]
async fn truncated_settings_reply_fails_connect() {
    let (transport, handle) = MockTransport::serial(configured_device());
    // A garbled line ahead of the real reply is not chatter: it carries the `g` opcode.
    handle.chatter(["g{\"beacons\":[{\"callsign\":"]);
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());

    let err = assert_err!(sync.connect().await);
    assert!(matches!(err, SyncError::Protocol(_)));
    assert_eq!(sync.state(), SyncState::Disconnected);
    assert!(!handle.is_open());
}
