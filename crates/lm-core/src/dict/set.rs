use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use tracing::{debug, warn};

use super::{DictEntry, DictError, Dictionary, PhraseTable};

/// A named factory table with a loaded-once guard.
///
/// `loaded` becomes true only after a successful parse and stays true until
/// `reset`. A load attempt first claims the set, so two tasks never populate
/// the same set concurrently; the losing task returns without parsing.
pub struct DictionarySet {
    name: &'static str,
    table: RwLock<PhraseTable>,
    loaded: AtomicBool,
    claimed: AtomicBool,
    load_count: AtomicUsize,
}

impl DictionarySet {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            table: RwLock::new(PhraseTable::new()),
            loaded: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            load_count: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Number of successful parses over the set's lifetime.
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::Acquire)
    }

    /// `(keys, entries)` of the current table.
    pub fn stats(&self) -> (usize, usize) {
        self.table.read().unwrap().stats()
    }

    /// Load a factory JSON resource.
    ///
    /// Returns `Ok(true)` when the resource was parsed now, `Ok(false)` when the
    /// set was already loaded or another task holds the claim.
    pub fn load_json(&self, path: &Path) -> Result<bool, DictError> {
        self.load_with(|| PhraseTable::open_json(path))
    }

    pub fn load_with(
        &self,
        parse: impl FnOnce() -> Result<PhraseTable, DictError>,
    ) -> Result<bool, DictError> {
        if self.is_loaded() {
            return Ok(false);
        }
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(set = self.name, "load already in progress, skipping");
            return Ok(false);
        }
        if self.is_loaded() {
            self.claimed.store(false, Ordering::Release);
            return Ok(false);
        }

        let _claim = ClaimGuard(&self.claimed);
        match parse() {
            Ok(table) => {
                let (keys, entries) = table.stats();
                *self.table.write().unwrap() = table;
                self.load_count.fetch_add(1, Ordering::AcqRel);
                self.loaded.store(true, Ordering::Release);
                debug!(set = self.name, keys, entries, "dictionary set loaded");
                Ok(true)
            }
            Err(e) => {
                warn!(set = self.name, error = %e, "dictionary set failed to load");
                Err(e)
            }
        }
    }

    /// Drop the parsed table so the next load request parses again.
    pub fn reset(&self) {
        debug_assert!(
            !self.claimed.load(Ordering::Acquire),
            "reset while {} is being loaded",
            self.name
        );
        *self.table.write().unwrap() = PhraseTable::new();
        self.loaded.store(false, Ordering::Release);
    }
}

/// Releases a load claim on drop, including when the parser panics.
struct ClaimGuard<'a>(&'a AtomicBool);

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dictionary for DictionarySet {
    fn lookup(&self, key: &str) -> Vec<DictEntry> {
        self.table.read().unwrap().get(key).to_vec()
    }

    fn has_pair(&self, key: &str, value: &str) -> bool {
        self.table
            .read()
            .unwrap()
            .get(key)
            .iter()
            .any(|e| e.value == value)
    }

    fn count(&self, key: &str) -> usize {
        self.table.read().unwrap().get(key).len()
    }
}
