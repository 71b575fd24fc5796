//! Process-wide owner of the per-variant language models.
//!
//! One `ModelCoordinator` is built at startup and handed by reference to
//! every consumer. It owns exactly one [`CompositeModel`] per concrete
//! variant for its whole lifetime, schedules factory loads on the
//! [`LoadScheduler`], and routes user-data edits through the consolidator
//! before reloading them.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use lm_core::access::{AccessGrantStore, PassThroughGrants, RestoreReport};
use lm_core::consolidator::{self, OVERRIDE_TAG};
use lm_core::location::{DataLocation, LocationError, UserDataKind};
use lm_core::model::{Candidate, CompositeModel, FactorySet, FeatureFlag};
use lm_core::override_store::{now_epoch, LoadOutcome, ScoredCandidate};
use lm_core::prefs::{PreferenceStore, Preferences};
use lm_core::settings::settings;
use lm_core::variant::LocaleVariant;
use tracing::{debug, info, warn};

use crate::loader::{LoadNotification, LoadScheduler, LoadUnit, Ticket};

pub struct ModelCoordinator {
    models: [Arc<CompositeModel>; 2],
    bundle_dir: PathBuf,
    location: DataLocation,
    grants: Arc<dyn AccessGrantStore>,
    scheduler: LoadScheduler,
}

impl ModelCoordinator {
    /// `bundle_dir` holds the factory JSON resources; `default_data_dir` is
    /// the application-support folder used when no other folder is chosen.
    pub fn new(
        bundle_dir: PathBuf,
        default_data_dir: PathBuf,
        prefs: Arc<PreferenceStore>,
        grants: Arc<dyn AccessGrantStore>,
    ) -> Self {
        let location = DataLocation::new(default_data_dir, prefs);
        let models = LocaleVariant::CONCRETE.map(|v| {
            Arc::new(CompositeModel::new(v, Some(location.override_data_path(v))))
        });
        let coordinator = Self {
            models,
            bundle_dir,
            location,
            grants,
            scheduler: LoadScheduler::new(settings().loader.worker_threads),
        };
        coordinator.apply_preferences();
        coordinator
    }

    /// In-memory preferences and no access grants.
    pub fn unsandboxed(bundle_dir: PathBuf, default_data_dir: PathBuf) -> Self {
        Self::new(
            bundle_dir,
            default_data_dir,
            Arc::new(PreferenceStore::in_memory(Preferences::default())),
            Arc::new(PassThroughGrants),
        )
    }

    /// The shared model of a concrete variant, or a fresh throwaway model for
    /// `Unset`.
    pub fn get_model(&self, variant: LocaleVariant) -> Arc<CompositeModel> {
        match variant.index() {
            Some(i) => Arc::clone(&self.models[i]),
            None => Arc::new(CompositeModel::ephemeral()),
        }
    }

    pub fn location(&self) -> &DataLocation {
        &self.location
    }

    pub fn prefs(&self) -> &Arc<PreferenceStore> {
        self.location.prefs()
    }

    /// Re-acquire access to user-chosen folders. Call once at startup,
    /// before the data folder is first resolved.
    pub fn restore_access(&self) -> RestoreReport {
        let report = self.grants.restore();
        info!(
            restored = report.restored,
            stale = report.stale,
            removed = report.removed,
            "access grants restored"
        );
        report
    }

    pub fn grant_access(&self, path: &Path) -> bool {
        match self.grants.grant(path) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to store access grant");
                false
            }
        }
    }

    /// Push the stored preferences into both models.
    pub fn apply_preferences(&self) {
        let p = self.prefs().get();
        for (flag, enabled) in [
            (FeatureFlag::PhraseReplacement, p.phrase_replacement_enabled),
            (FeatureFlag::Associates, p.associated_phrases_enabled),
            (FeatureFlag::Scpc, p.scpc_typing_mode),
            (FeatureFlag::Cns, p.cns_enabled),
            (FeatureFlag::Symbol, p.symbol_enabled),
        ] {
            self.set_feature_flag(flag, enabled);
        }
        self.set_year_offset(p.delta_of_calendar_years);
    }

    /// Make sure the data folder and every user file exist, then load all
    /// user overlays and both override stores.
    ///
    /// Fails only when no writable data folder can be found at all.
    pub fn initialize_user_overlays(&self) -> Result<PathBuf, LocationError> {
        let folder = self.location.ensure_user_data_folder()?;
        for variant in LocaleVariant::CONCRETE {
            if let Err(e) = self.location.ensure_user_files(&folder, variant) {
                warn!(%variant, error = %e, "failed to seed user files");
            }
        }
        self.load_user_overlays(&folder, None);
        for model in &self.models {
            match model.overrides().load() {
                Ok(LoadOutcome::Quarantined(moved)) => {
                    warn!(variant = %model.variant(), to = %moved.display(), "override data was corrupt")
                }
                Ok(outcome) => debug!(variant = %model.variant(), ?outcome, "override data"),
                Err(e) => warn!(variant = %model.variant(), error = %e, "override data unreadable"),
            }
        }
        Ok(folder)
    }

    /// Reload one kind of user data, or every kind, for both variants.
    pub fn reload_user_data(&self, kind: Option<UserDataKind>) {
        let folder = self.location.data_folder(false);
        self.load_user_overlays(&folder, kind);
    }

    fn load_user_overlays(&self, folder: &Path, only: Option<UserDataKind>) {
        let kinds: Vec<UserDataKind> = match only {
            Some(kind) => vec![kind],
            None => UserDataKind::ALL.to_vec(),
        };
        for model in &self.models {
            for &kind in &kinds {
                if kind.is_consolidated() {
                    consolidator::consolidate(&folder.join(kind.file_name(model.variant())), true);
                }
            }
            let loaded = model.load_user_folder(folder, &kinds);
            debug!(variant = %model.variant(), loaded, "user overlays loaded");
        }
    }

    /// Schedule every not-yet-loaded factory set of both variants.
    pub fn load_all_dictionaries(&self, notify: bool) -> Ticket {
        self.schedule(&LocaleVariant::CONCRETE, notify, false)
    }

    /// Schedule the not-yet-loaded factory sets of one variant.
    pub fn load_variant(&self, variant: LocaleVariant, notify: bool) -> Ticket {
        self.schedule(&[variant], notify, false)
    }

    /// Forget all factory data and load it again, for `current` only or for
    /// both variants depending on preferences.
    pub fn reload_factory_dictionaries(&self, current: LocaleVariant) -> Ticket {
        let lazy = self.prefs().get().only_load_factory_lang_models_if_needed;
        if lazy && current.is_concrete() {
            self.schedule(&[current], true, true)
        } else {
            self.schedule(&LocaleVariant::CONCRETE, true, true)
        }
    }

    /// The planner runs on the dispatcher, after every earlier request has
    /// finished, so resets never race a running load and sets loaded by an
    /// earlier request are skipped.
    fn schedule(&self, variants: &[LocaleVariant], notify: bool, reset: bool) -> Ticket {
        let all: Vec<Arc<CompositeModel>> = self.models.iter().cloned().collect();
        let targets: Vec<Arc<CompositeModel>> = variants
            .iter()
            .filter_map(|v| v.index())
            .map(|i| Arc::clone(&self.models[i]))
            .collect();
        let bundle = self.bundle_dir.clone();

        self.scheduler.submit(variants, notify, move || {
            if reset {
                for model in &all {
                    model.reset_factory_data();
                }
            }
            plan_factory_units(&targets, &bundle)
        })
    }

    pub fn is_loading(&self, variant: LocaleVariant) -> bool {
        self.scheduler.is_loading(variant)
    }

    pub fn poll_notifications(&self) -> Vec<LoadNotification> {
        self.scheduler.poll_notifications()
    }

    pub fn wait_completion(&self, ticket: Ticket, timeout: Duration) -> Option<LoadNotification> {
        self.scheduler.wait_completion(ticket, timeout)
    }

    /// Applied to both variants. No I/O.
    pub fn set_feature_flag(&self, flag: FeatureFlag, enabled: bool) {
        for model in &self.models {
            model.set_feature(flag, enabled);
        }
    }

    pub fn set_year_offset(&self, delta: i32) {
        for model in &self.models {
            model.set_year_offset(delta);
        }
    }

    pub fn query(&self, variant: LocaleVariant, reading: &str) -> Vec<Candidate> {
        self.get_model(variant).query(reading)
    }

    pub fn record_override(&self, variant: LocaleVariant, context_key: &str, candidate: &str) {
        self.get_model(variant)
            .record_override(context_key, candidate, now_epoch());
    }

    pub fn override_suggestions(
        &self,
        variant: LocaleVariant,
        context_key: &str,
    ) -> Vec<ScoredCandidate> {
        self.get_model(variant)
            .override_suggestions(context_key, now_epoch())
    }

    /// Save both override stores concurrently.
    ///
    /// With `wait`, blocks until both finish or the configured bound
    /// elapses; returns false if either failed or timed out.
    pub fn save_user_override_model_data(&self, wait: bool) -> bool {
        let (tx, rx) = mpsc::channel::<bool>();
        let mut spawned = 0;
        for model in &self.models {
            let model = Arc::clone(model);
            let tx = tx.clone();
            let spawn = thread::Builder::new()
                .name(format!("lm-save-{}", model.variant().tag()))
                .spawn(move || {
                    let ok = match model.overrides().save() {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(variant = %model.variant(), error = %e, "override save failed");
                            false
                        }
                    };
                    let _ = tx.send(ok);
                });
            match spawn {
                Ok(_) => spawned += 1,
                Err(e) => warn!(error = %e, "failed to spawn override saver"),
            }
        }
        drop(tx);
        if !wait {
            return spawned == self.models.len();
        }

        let deadline = Instant::now() + Duration::from_millis(settings().loader.save_wait_ms);
        let mut all_ok = spawned == self.models.len();
        for _ in 0..spawned {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(ok) => all_ok &= ok,
                Err(_) => {
                    warn!("timed out waiting for override saves");
                    return false;
                }
            }
        }
        all_ok
    }

    pub fn bleach_specified_suggestions(&self, variant: LocaleVariant, targets: &[&str]) -> usize {
        self.get_model(variant).overrides().bleach(targets)
    }

    pub fn remove_unigrams_from_user_override_model(&self, variant: LocaleVariant) -> usize {
        self.get_model(variant).overrides().bleach_all_unigrams()
    }

    /// Clear one variant's override data, or both for `Unset`.
    pub fn clear_user_override_model_data(&self, variant: LocaleVariant) {
        let targets: Vec<&Arc<CompositeModel>> = match variant.index() {
            Some(i) => vec![&self.models[i]],
            None => self.models.iter().collect(),
        };
        for model in targets {
            let store = model.overrides();
            if let Some(path) = store.data_path() {
                if let Err(e) = store.clear_data(path) {
                    warn!(variant = %model.variant(), error = %e, "failed to clear override data");
                }
            }
        }
    }

    /// Move both override files aside as crash evidence and start over.
    pub fn relocate_wrecked_override_data(&self) -> Vec<PathBuf> {
        let mut moved = Vec::new();
        for model in &self.models {
            match model.overrides().quarantine_corrupt_data() {
                Ok(Some(path)) => moved.push(path),
                Ok(None) => {}
                Err(e) => warn!(variant = %model.variant(), error = %e, "failed to relocate override data"),
            }
        }
        moved
    }

    /// Append a phrase record to the user phrases (or, when deleting, the
    /// filter list), consolidate the file and reload it.
    pub fn write_user_phrase(
        &self,
        record: &str,
        variant: LocaleVariant,
        duplicating: bool,
        deleting: bool,
    ) -> bool {
        let record = record.trim();
        if record.is_empty() || !variant.is_concrete() {
            return false;
        }
        let folder = match self.location.ensure_user_data_folder() {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "no user data folder for phrase write");
                return false;
            }
        };
        for v in LocaleVariant::CONCRETE {
            if let Err(e) = self.location.ensure_user_files(&folder, v) {
                warn!(variant = %v, error = %e, "user files missing");
                return false;
            }
        }

        let kind = if deleting {
            UserDataKind::Filter
        } else {
            UserDataKind::Phrases
        };
        let path = folder.join(kind.file_name(variant));
        let mut line = record.to_string();
        if duplicating && !deleting {
            line.push('\t');
            line.push_str(OVERRIDE_TAG);
        }
        if let Err(e) = append_line(&path, &line) {
            warn!(path = %path.display(), error = %e, "failed to append user phrase");
            return false;
        }
        if !consolidator::consolidate(&path, false) {
            return false;
        }
        self.load_user_overlays(&folder, Some(kind));
        true
    }

    /// Forget the user-chosen folder and reinitialize from the default.
    pub fn reset_specified_user_data_folder(&self) -> Result<PathBuf, LocationError> {
        self.prefs().clear_specified_folder();
        self.initialize_user_overlays()
    }

    pub fn is_factory_loaded(&self, variant: LocaleVariant, set: FactorySet) -> bool {
        variant
            .index()
            .is_some_and(|i| self.models[i].is_loaded(set))
    }
}

fn plan_factory_units(models: &[Arc<CompositeModel>], bundle: &Path) -> Vec<LoadUnit> {
    let mut units = Vec::new();
    for model in models {
        for set in FactorySet::ALL {
            if model.is_loaded(set) {
                continue;
            }
            let label = format!("{}/{}", model.variant().tag(), set.label());
            let model = Arc::clone(model);
            let bundle = bundle.to_path_buf();
            units.push(LoadUnit::new(label, set == FactorySet::Core, move || {
                model
                    .load_factory(set, &bundle)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }));
        }
    }
    units
}

/// Append `line` on a line of its own.
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().read(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    let mut needs_newline = false;
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        needs_newline = last[0] != b'\n';
    }
    if needs_newline {
        file.write_all(b"\n")?;
    }
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}
