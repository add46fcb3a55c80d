//! JSON file backed state store
//!
//! Keeps all values in memory and rewrites the whole file on every mutation:
//! - Atomic writes via temp file, fsync and rename
//! - A corrupt or unreadable file is logged and replaced on the next write
//! - Writes inside [`LocalStateStore::batch`] are written out once at the end

use super::{LocalStateStore, StoreValue};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

type Values = BTreeMap<String, StoreValue>;

/// Persistent store writing a single JSON object to disk.
///
/// Every write outside a batch rewrites and fsyncs the whole file while the
/// map lock is held.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<Values>,
    batch_depth: AtomicUsize,
}

impl JsonFileStore {
    /// Open a store at `path`, loading any existing state
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let values = if path.exists() {
            match load_from_disk(&path) {
                Ok(values) => {
                    info!(path = %path.display(), entries = values.len(), "Loaded sync state from disk");
                    values
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Failed to load persisted sync state, starting fresh");
                    Values::new()
                }
            }
        } else {
            Values::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
            batch_depth: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current state to disk
    pub fn flush(&self) -> Result<()> {
        let values = self.lock();
        save_to_disk(&self.path, &values)
    }

    fn lock(&self) -> MutexGuard<'_, Values> {
        // A panic while holding the lock leaves the map itself intact
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, values: &Values) {
        if self.batch_depth.load(Ordering::SeqCst) > 0 {
            return;
        }
        match save_to_disk(&self.path, values) {
            Ok(()) => debug!(path = %self.path.display(), entries = values.len(), "Sync state flushed to disk"),
            Err(e) => warn!(error = %e, path = %self.path.display(), "Failed to persist sync state"),
        }
    }
}

impl LocalStateStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<StoreValue> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: StoreValue) {
        let mut values = self.lock();
        values.insert(key.to_string(), value);
        self.persist(&values);
    }

    fn remove(&self, key: &str) {
        let mut values = self.lock();
        if values.remove(key).is_some() {
            self.persist(&values);
        }
    }

    fn batch(&self, apply: &mut dyn FnMut()) {
        self.batch_depth.fetch_add(1, Ordering::SeqCst);
        apply();
        if self.batch_depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            let values = self.lock();
            self.persist(&values);
        }
    }
}

fn load_from_disk(path: &Path) -> Result<Values> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read state file {:?}", path))?;
    serde_json::from_slice(&data).context("Failed to deserialize state file")
}

fn save_to_disk(path: &Path, values: &Values) -> Result<()> {
    let json = serde_json::to_vec_pretty(values).context("Failed to serialize sync state")?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(&json).context("Failed to write sync state")?;
    file.sync_all().context("Failed to sync state file")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}
