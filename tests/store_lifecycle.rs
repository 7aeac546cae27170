//! Settings store against an on-disk cache.

use std::time::{Duration, Instant};

use tokio_test::{assert_err, assert_ok};
use trackerconf::settings::schema::Schema;
use trackerconf::settings::Settings;
use trackerconf::store::cache::{FileCache, SettingsCache, CONFIG_KEY};
use trackerconf::store::{Change, SettingsStore};
use trackerconf::SyncError;

const DEBOUNCE: Duration = Duration::from_millis(1000);

fn open(dir: &std::path::Path) -> SettingsStore {
    SettingsStore::open(Schema::default(), Box::new(FileCache::new(dir)), DEBOUNCE)
}

fn cached(dir: &std::path::Path) -> Option<Settings> {
    FileCache::new(dir)
        .read(CONFIG_KEY)
        .unwrap()
        .map(|json| serde_json::from_str(&json).unwrap())
}

#[test]
fn ten_rapid_edits_produce_one_write_with_final_state() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = open(tmp.path());
    let writes = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = writes.clone();
    store.subscribe(move |event| {
        if event.change == Change::CacheWritten {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let start = Instant::now();
    for i in 0..10u64 {
        let at = start + Duration::from_millis(i * 100);
        store.update_at(|s| s.other.send_comment_after_x_beacons = 100 + i as u16, at);
        assert!(!assert_ok!(store.flush_due(at)));
    }
    assert!(cached(tmp.path()).is_none());

    let last_edit = start + Duration::from_millis(900);
    assert!(!assert_ok!(store.flush_due(last_edit + Duration::from_millis(999))));
    assert!(assert_ok!(store.flush_due(last_edit + DEBOUNCE)));
    assert!(!assert_ok!(store.flush_due(last_edit + DEBOUNCE * 5)));

    assert_eq!(writes.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(
        cached(tmp.path()).unwrap().other.send_comment_after_x_beacons,
        109
    );
}

#[test]
fn reopened_store_restores_last_valid_settings() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut store = open(tmp.path());
        assert!(!store.restored_from_cache());
        store.update(|s| s.beacons[0].callsign = "EA1ABC-7".to_string());
        assert_ok!(store.flush_pending());
        // Invalid edit after the write never reaches disk.
        store.update(|s| s.lora.coding_rate4 = 9);
        assert_ok!(store.flush_pending());
    }
    let store = open(tmp.path());
    assert!(store.restored_from_cache());
    assert_eq!(store.settings().beacons[0].callsign, "EA1ABC-7");
    assert_eq!(store.settings().lora.coding_rate4, 5);
    assert!(store.is_valid());
    assert!(!store.is_dirty());
}

#[test]
fn corrupt_cache_file_falls_back_to_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("config.json"), "{\"beacons\": 3").unwrap();
    let store = open(tmp.path());
    assert!(!store.restored_from_cache());
    assert_eq!(store.settings(), &Schema::default().default_value());
}

#[test]
fn malformed_backup_import_changes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = open(tmp.path());
    store.update(|s| s.other.path = "WIDE2-2".to_string());
    assert_ok!(store.flush_pending());
    let before = store.settings().clone();

    let backup = store.export_backup().unwrap();
    let err = assert_err!(store.import_backup(&backup[..40]));
    assert!(matches!(err, SyncError::Serialization(_)));
    assert_eq!(store.settings(), &before);
    assert!(store.next_flush().is_none());
    assert_eq!(cached(tmp.path()).unwrap(), before);
}

#[test]
fn backup_restore_into_fresh_cache() {
    let source = tempfile::tempdir().unwrap();
    let mut store = open(source.path());
    assert!(store.add_beacon());
    store.update(|s| {
        s.beacons[1].callsign = "EA1ABC-9".to_string();
        s.notification.buzzer_active = true;
    });
    let backup = assert_ok!(store.export_backup());

    let target = tempfile::tempdir().unwrap();
    let mut restored = open(target.path());
    assert_ok!(restored.import_backup(&backup));
    assert!(assert_ok!(restored.flush_pending()));
    assert_eq!(cached(target.path()).unwrap(), *store.settings());
}

#[test]
fn backup_with_wrong_field_type_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = open(tmp.path());
    let mut doc: serde_json::Value = serde_json::from_str(&store.export_backup().unwrap()).unwrap();
    doc["lora"]["power"] = serde_json::json!("twenty");
    let err = assert_err!(store.import_backup(&doc.to_string()));
    assert!(matches!(err, SyncError::Serialization(_)));
}

#[tokio::test]
async fn settle_writes_after_quiet_period() {
    let tmp = tempfile::tempdir().unwrap();
    let mut store = SettingsStore::open(
        Schema::default(),
        Box::new(FileCache::new(tmp.path())),
        Duration::from_millis(30),
    );
    store.update(|s| s.lora.power = 10);
    store.update(|s| s.lora.power = 11);
    assert!(assert_ok!(store.settle().await));
    assert_eq!(cached(tmp.path()).unwrap().lora.power, 11);
}
