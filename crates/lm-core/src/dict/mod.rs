//! Dictionary storage.
//!
//! `PhraseTable` is an in-memory reading → entries map, built either from a
//! factory JSON resource or from a user-edited text file. `DictionarySet`
//! wraps a table with the loaded-once guard the coordinator schedules on.

mod set;
mod table;

pub use set::DictionarySet;
pub use table::{PhraseTable, TextFormat};

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum DictError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("dictionary resource not found: {0}")]
    Missing(PathBuf),

    #[error("corrupt dictionary {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl DictError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DictError::Io(e) => ErrorKind::of_io(e),
            DictError::Missing(_) => ErrorKind::ResourceMissing,
            DictError::Corrupt { .. } => ErrorKind::ResourceCorrupt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictEntry {
    pub value: String,
    /// Log-probability style weight; higher ranks first.
    pub weight: f64,
}

impl DictEntry {
    pub fn new(value: impl Into<String>, weight: f64) -> Self {
        Self {
            value: value.into(),
            weight,
        }
    }
}

pub trait Dictionary: Send + Sync {
    /// All entries for an exact reading key, best first.
    fn lookup(&self, key: &str) -> Vec<DictEntry>;

    fn has_pair(&self, key: &str, value: &str) -> bool {
        self.lookup(key).iter().any(|e| e.value == value)
    }

    fn count(&self, key: &str) -> usize {
        self.lookup(key).len()
    }
}
