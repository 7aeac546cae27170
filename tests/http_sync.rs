//! HTTP admin page lifecycle against the scripted tracker.

mod common;

use tokio_test::{assert_err, assert_ok};
use trackerconf::codec::{form, Mode};
use trackerconf::settings::schema::Schema;
use trackerconf::store::cache::MemoryCache;
use trackerconf::sync::SyncState;
use trackerconf::transport::mock::MockTransport;
use trackerconf::SyncError;

use common::{configured_device, controller, fast_options};

#[tokio::test]
async fn connect_reads_configuration_document() {
    let device = configured_device();
    let (transport, handle) = MockTransport::http(device.clone());
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());

    assert_ok!(sync.connect().await);
    assert_eq!(sync.store().settings(), &device);
    let sent = handle.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].mode, Mode::HttpRead);
}

#[tokio::test]
async fn save_posts_form_and_waits_for_device_to_return() {
    let (transport, handle) = MockTransport::http(configured_device());
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());
    assert_ok!(sync.connect().await);

    // The tracker restarts after a write and misses the first two probes.
    handle.fail_probes(2);
    sync.store_mut().update(|s| {
        s.beacons[1].comment = "hiking & biking".to_string();
        s.bme.active = false;
    });
    assert_ok!(sync.save_current().await);

    assert_eq!(sync.state(), SyncState::Connected);
    assert_eq!(handle.probes(), 3);
    assert_eq!(handle.applied(), 1);
    assert_eq!(handle.device().beacons[1].comment, "hiking & biking");
    assert!(!handle.device().bme.active);

    let sent = handle.sent();
    let write = sent.iter().find(|r| r.mode == Mode::HttpWrite).unwrap();
    assert!(write.payload.contains("beacons.1.comment=hiking%20%26%20biking"));
    assert!(!write.payload.contains("bme.active"));
    let pairs = form::parse_body(&write.payload).unwrap();
    assert!(pairs.contains(&("other.path".to_string(), "WIDE2-1".to_string())));

    // Refresh after the write.
    assert_eq!(sent.last().unwrap().mode, Mode::HttpRead);
    assert_eq!(sync.store().settings(), &handle.device());
}

#[tokio::test]
async fn status_polling_is_bounded() {
    let (transport, handle) = MockTransport::http(configured_device());
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());
    assert_ok!(sync.connect().await);
    handle.silence(true);

    let err = assert_err!(sync.save_current().await);
    assert!(matches!(err, SyncError::Timeout(_)));
    assert_eq!(handle.probes(), fast_options().status_max_attempts as usize);
    assert_eq!(sync.state(), SyncState::Connected);
}

#[tokio::test]
async fn device_normalization_is_picked_up_after_save() {
    let (transport, handle) = MockTransport::http(configured_device());
    handle.normalize_with(|s| {
        for beacon in &mut s.beacons {
            beacon.callsign = beacon.callsign.to_uppercase();
        }
    });
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());
    assert_ok!(sync.connect().await);

    sync.store_mut().update(|s| s.beacons[0].callsign = "ea1abc-7".to_string());
    assert_ok!(sync.save_current().await);
    assert_eq!(sync.store().settings().beacons[0].callsign, "EA1ABC-7");
    assert!(!sync.store().is_dirty());
}

#[tokio::test]
async fn unreachable_device_fails_connect() {
    let (transport, handle) = MockTransport::http(configured_device());
    handle.fail_open(true);
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());

    let err = assert_err!(sync.connect().await);
    assert!(matches!(err, SyncError::Connection(_)));
    assert_eq!(sync.state(), SyncState::Disconnected);
    assert!(handle.sent().is_empty());

    // A later attempt can still succeed.
    handle.fail_open(false);
    assert_eq!(assert_ok!(sync.connect().await), SyncState::Connected);
}

#[tokio::test]
async fn html_error_page_is_malformed() {
    let (transport, handle) = MockTransport::http(configured_device());
    let mut sync = controller(transport, Schema::default(), &MemoryCache::new());
    assert_ok!(sync.connect().await);

    handle.silence(true);
    handle.push_inbound("<html><body>404 Not Found</body></html>");
    let err = assert_err!(sync.refresh().await);
    assert!(matches!(err, SyncError::Protocol(_)));
    assert_eq!(sync.state(), SyncState::Connected);
    assert_eq!(sync.store().settings(), &configured_device());
}
