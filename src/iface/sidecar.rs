//! Checksum sidecar cache.
//!
//! Finished (and optionally unfinished) checksums can be stashed in a JSON
//! cache keyed by absolute path, so a later run skips reading files whose
//! whole same-size class is already known. The store is consulted once per
//! file during preprocessing and written as files finish.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use log::{debug, warn};

pub trait SidecarStore: Send + Sync {
    fn read_hash(&self, path: &Path) -> Option<String>;
    fn write_hash(&self, path: &Path, hex: &str);
}

/// No persistence; reads always miss, writes vanish.
pub struct NullSidecar;

impl SidecarStore for NullSidecar {
    fn read_hash(&self, _path: &Path) -> Option<String> {
        None
    }

    fn write_hash(&self, _path: &Path, _hex: &str) {}
}

/// JSON-file-backed cache: a flat map of absolute path to hex checksum.
pub struct JsonSidecar {
    file: PathBuf,
    map: Mutex<HashMap<PathBuf, String>>,
    dirty: AtomicBool,
}

impl JsonSidecar {
    /// Load the cache at `file`, starting empty when it is missing or
    /// unparseable (a damaged cache only costs re-hashing).
    pub fn load(file: PathBuf) -> Self {
        let map = match std::fs::read_to_string(&file) {
            Ok(s) => match serde_json::from_str::<HashMap<PathBuf, String>>(&s) {
                Ok(m) => {
                    debug!("sidecar cache: {} entries from {}", m.len(), file.display());
                    m
                }
                Err(e) => {
                    warn!("ignoring damaged sidecar cache {}: {}", file.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        JsonSidecar {
            file,
            map: Mutex::new(map),
            dirty: AtomicBool::new(false),
        }
    }

    /// Persist the cache if anything changed since load.
    pub fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        let map = self.map.lock().unwrap();
        let json = serde_json::to_string_pretty(&*map)?;
        std::fs::write(&self.file, json)
            .with_context(|| format!("write sidecar cache {}", self.file.display()))?;
        debug!("sidecar cache: wrote {} entries", map.len());
        Ok(())
    }
}

impl SidecarStore for JsonSidecar {
    fn read_hash(&self, path: &Path) -> Option<String> {
        self.map.lock().unwrap().get(path).cloned()
    }

    fn write_hash(&self, path: &Path, hex: &str) {
        self.map
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), hex.to_string());
        self.dirty.store(true, Ordering::Relaxed);
    }
}

impl Drop for JsonSidecar {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("{}", e);
        }
    }
}
