use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{OverrideEvent, OverrideStore};
use crate::error::ErrorKind;
use crate::fsutil::{atomic_write, quarantine};

const MAGIC: &[u8; 4] = b"LMUO";
const VERSION: u8 = 1;
/// magic + version + crc32
const HEADER_LEN: usize = 9;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt override data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io(e) => ErrorKind::of_io(e),
            StoreError::Corrupt(_) => ErrorKind::ResourceCorrupt,
        }
    }
}

/// What `load_data` found on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Number of events restored.
    Loaded(usize),
    Missing,
    /// The file failed validation and was renamed to this path.
    Quarantined(PathBuf),
}

#[derive(Serialize, Deserialize)]
struct OverrideData {
    events: Vec<OverrideEvent>,
}

pub(super) fn encode(events: Vec<OverrideEvent>) -> Result<Vec<u8>, StoreError> {
    let body = bincode::serialize(&OverrideData { events })
        .map_err(|e| StoreError::Io(io::Error::other(e)))?;
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

pub(super) fn decode(bytes: &[u8]) -> Result<Vec<OverrideEvent>, StoreError> {
    if bytes.len() < HEADER_LEN {
        return Err(StoreError::Corrupt("too short".to_string()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(StoreError::Corrupt("bad magic".to_string()));
    }
    if bytes[4] != VERSION {
        return Err(StoreError::Corrupt(format!("unsupported version {}", bytes[4])));
    }
    let expected = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
    let body = &bytes[HEADER_LEN..];
    if crc32fast::hash(body) != expected {
        return Err(StoreError::Corrupt("checksum mismatch".to_string()));
    }
    let data: OverrideData =
        bincode::deserialize(body).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(data.events)
}

impl OverrideStore {
    /// Replace the in-memory log with the contents of `path`.
    ///
    /// A file that fails validation is renamed aside and the store is left
    /// empty; only I/O errors other than "not found" are returned.
    pub fn load_data(&self, path: &Path) -> Result<LoadOutcome, StoreError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.reset();
                return Ok(LoadOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        };
        match decode(&bytes) {
            Ok(events) => {
                let n = events.len();
                self.replace_with(events);
                debug!(path = %path.display(), events = n, "override data loaded");
                Ok(LoadOutcome::Loaded(n))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "override data corrupt");
                self.reset();
                match quarantine(path)? {
                    Some(moved) => {
                        info!(to = %moved.display(), "quarantined override data");
                        Ok(LoadOutcome::Quarantined(moved))
                    }
                    None => Ok(LoadOutcome::Missing),
                }
            }
        }
    }

    /// Serialize a snapshot of the log to `path` atomically.
    pub fn save_data(&self, path: &Path) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().unwrap();
        let events = self.snapshot();
        let n = events.len();
        let bytes = encode(events)?;
        atomic_write(path, &bytes)?;
        debug!(path = %path.display(), events = n, "override data saved");
        Ok(())
    }

    /// Save to the store's own path. No-op for ephemeral stores.
    pub fn save(&self) -> Result<(), StoreError> {
        match &self.data_path {
            Some(path) => self.save_data(path),
            None => Ok(()),
        }
    }

    /// Load from the store's own path. Ephemeral stores report `Missing`.
    pub fn load(&self) -> Result<LoadOutcome, StoreError> {
        match &self.data_path {
            Some(path) => self.load_data(path),
            None => Ok(LoadOutcome::Missing),
        }
    }

    /// Delete the persisted file and every in-memory event.
    pub fn clear_data(&self, path: &Path) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().unwrap();
        self.reset();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rename the store's data file aside and start over empty.
    pub fn quarantine_corrupt_data(&self) -> Result<Option<PathBuf>, StoreError> {
        let Some(path) = &self.data_path else {
            return Ok(None);
        };
        let _guard = self.save_lock.lock().unwrap();
        self.reset();
        Ok(quarantine(path)?)
    }
}
