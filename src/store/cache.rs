//! Local durable cache for the last valid settings.
//!
//! Entries are JSON documents keyed by name (the settings live under `config`),
//! so the tool can pre-populate before any device round trip.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;

/// Key of the settings snapshot.
pub const CONFIG_KEY: &str = "config";

pub trait SettingsCache: Send {
    /// `Ok(None)` when nothing has been stored under `key` yet.
    fn read(&self, key: &str) -> io::Result<Option<String>>;
    fn write(&mut self, key: &str, contents: &str) -> io::Result<()>;
}

/// One `<key>.json` file per entry inside a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl SettingsCache for FileCache {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            // Leading NULs are left behind by a partially flushed write on some filesystems.
            Ok(content) => Ok(Some(content.trim_start_matches('\0').to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write to a unique temp file in the same directory, then rename over the target.
    fn write(&mut self, key: &str, contents: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(key);
        let mut counter = 0u32;
        let tmp_path = loop {
            let candidate = self
                .dir
                .join(format!(".{}.json.tmp-{}-{}", key, std::process::id(), counter));
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(tmp) => {
                    fill_temp(&tmp, &candidate, contents)?;
                    if let Err(e) = tmp.sync_all() {
                        debug!("fsync of {} failed: {}", candidate.display(), e);
                    }
                    break candidate;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        };
        fs::rename(&tmp_path, &target)?;
        if let Ok(dir_file) = File::open(&self.dir) {
            let _ = dir_file.sync_all();
        }
        Ok(())
    }
}

/// Write `contents` through `out`; a half-written temp file at `path` is removed.
fn fill_temp<W>(mut out: W, path: &Path, contents: &str) -> io::Result<()>
where
    W: Write,
{
    let result = out.write_all(contents.as_bytes()).and_then(|_| out.flush());
    if result.is_err() {
        drop(out);
        let _ = fs::remove_file(path);
    }
    result
}

#[derive(Debug, Default)]
struct MemoryEntries {
    entries: HashMap<String, String>,
    writes: usize,
}

/// In-memory cache whose clones share state, so a test can keep a handle while
/// the store owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<Mutex<MemoryEntries>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry without counting it as a write.
    pub fn with_entry(self, key: &str, contents: &str) -> Self {
        if let Ok(mut guard) = self.inner.lock() {
            guard.entries.insert(key.to_string(), contents.to_string());
        }
        self
    }

    pub fn writes(&self) -> usize {
        self.inner.lock().map(|g| g.writes).unwrap_or(0)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .ok()
            .and_then(|g| g.entries.get(key).cloned())
    }
}

impl SettingsCache for MemoryCache {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory cache poisoned"))?;
        Ok(guard.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, contents: &str) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory cache poisoned"))?;
        guard.entries.insert(key.to_string(), contents.to_string());
        guard.writes += 1;
        Ok(())
    }
}
