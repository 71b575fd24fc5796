//! User preferences persisted as TOML.
//!
//! Unlike [`settings`](crate::settings), which are fixed engine tunables,
//! preferences change at runtime (the resolver clears an invalid data folder,
//! the host toggles features) and are written back on every update.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::fsutil::atomic_write;

#[derive(Debug, thiserror::Error)]
pub enum PreferencesError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("preferences parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("preferences encode error: {0}")]
    Encode(#[from] toml::ser::Error),
}

impl PreferencesError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreferencesError::Io(e) => ErrorKind::of_io(e),
            PreferencesError::Parse(_) | PreferencesError::Encode(_) => ErrorKind::ResourceCorrupt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// User-chosen data folder; `None` means the default location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data_folder_specified: Option<String>,
    /// Reload factory dictionaries for the active variant only.
    pub only_load_factory_lang_models_if_needed: bool,
    pub phrase_replacement_enabled: bool,
    pub associated_phrases_enabled: bool,
    pub scpc_typing_mode: bool,
    pub cns_enabled: bool,
    pub symbol_enabled: bool,
    /// Shift applied to the year in `MACRO@YEAR` / `MACRO@DATE` expansion.
    pub delta_of_calendar_years: i32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            user_data_folder_specified: None,
            only_load_factory_lang_models_if_needed: true,
            phrase_replacement_enabled: false,
            associated_phrases_enabled: false,
            scpc_typing_mode: false,
            cns_enabled: false,
            symbol_enabled: true,
            delta_of_calendar_years: 0,
        }
    }
}

/// Shared, optionally file-backed preferences.
pub struct PreferenceStore {
    path: Option<PathBuf>,
    inner: RwLock<Preferences>,
}

impl PreferenceStore {
    /// Open preferences at `path`. A missing file yields defaults; an
    /// unparsable one is logged and replaced by defaults on the next save.
    pub fn open(path: &Path) -> Result<Self, PreferencesError> {
        let prefs = match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Preferences>(&content) {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "preferences unreadable, using defaults");
                    Preferences::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Preferences::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            inner: RwLock::new(prefs),
        })
    }

    pub fn in_memory(prefs: Preferences) -> Self {
        Self {
            path: None,
            inner: RwLock::new(prefs),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> Preferences {
        self.inner.read().unwrap().clone()
    }

    /// Mutate and persist.
    pub fn update(&self, f: impl FnOnce(&mut Preferences)) -> Result<(), PreferencesError> {
        let snapshot = {
            let mut prefs = self.inner.write().unwrap();
            f(&mut prefs);
            prefs.clone()
        };
        self.save(&snapshot)
    }

    fn save(&self, prefs: &Preferences) -> Result<(), PreferencesError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = toml::to_string_pretty(prefs)?;
        atomic_write(path, text.as_bytes())?;
        debug!(path = %path.display(), "preferences saved");
        Ok(())
    }

    pub fn specified_folder(&self) -> Option<String> {
        self.inner.read().unwrap().user_data_folder_specified.clone()
    }

    /// Forget the user-chosen data folder. Persistence failures are logged;
    /// the in-memory value is cleared regardless.
    pub fn clear_specified_folder(&self) {
        if let Err(e) = self.update(|p| p.user_data_folder_specified = None) {
            warn!(error = %e, "failed to persist cleared data folder preference");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::open(&dir.path().join("prefs.toml")).unwrap();
        assert_eq!(store.get(), Preferences::default());
    }

    #[test]
    fn update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        let store = PreferenceStore::open(&path).unwrap();
        store
            .update(|p| {
                p.user_data_folder_specified = Some("/tmp/lm".to_string());
                p.delta_of_calendar_years = -2000;
            })
            .unwrap();

        let reopened = PreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.specified_folder().as_deref(), Some("/tmp/lm"));
        assert_eq!(reopened.get().delta_of_calendar_years, -2000);

        reopened.clear_specified_folder();
        let again = PreferenceStore::open(&path).unwrap();
        assert_eq!(again.specified_folder(), None);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        fs::write(&path, "cns_enabled = true\n").unwrap();
        let prefs = PreferenceStore::open(&path).unwrap().get();
        assert!(prefs.cns_enabled);
        assert!(prefs.symbol_enabled);
    }

    #[test]
    fn garbage_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        fs::write(&path, "cns_enabled = = =").unwrap();
        assert_eq!(PreferenceStore::open(&path).unwrap().get(), Preferences::default());
    }
}
