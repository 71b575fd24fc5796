use std::path::{Path, PathBuf};
use std::sync::Arc;

use lm_core::access::{AccessGrantStore, PassThroughGrants, PathTokenResolver, PersistentGrants};
use lm_core::location::{default_data_dir, APP_NAME};
use lm_core::prefs::{PreferenceStore, Preferences};
use lm_core::variant::LocaleVariant;

use super::{
    LmCandidate, LmError, LmFeature, LmNotification, LmRestoreReport, LmSuggestion, LmUserDataKind,
    LmVariant,
};
use crate::coordinator::ModelCoordinator;

#[derive(uniffi::Object)]
pub struct LmCoordinator {
    inner: ModelCoordinator,
}

#[uniffi::export]
impl LmCoordinator {
    /// `data_dir` defaults to the platform support folder. Without
    /// `prefs_path` preferences live in memory; without `grant_store_path`
    /// no access grants are kept.
    #[uniffi::constructor]
    fn new(
        bundle_dir: String,
        data_dir: Option<String>,
        prefs_path: Option<String>,
        grant_store_path: Option<String>,
    ) -> Result<Arc<Self>, LmError> {
        let prefs = match prefs_path {
            Some(p) => PreferenceStore::open(Path::new(&p)).map_err(|e| LmError::Io {
                msg: format!("{p}: {e}"),
            })?,
            None => PreferenceStore::in_memory(Preferences::default()),
        };
        let grants: Arc<dyn AccessGrantStore> = match grant_store_path {
            Some(p) => Arc::new(PersistentGrants::new(PathBuf::from(p), PathTokenResolver)),
            None => Arc::new(PassThroughGrants),
        };
        let default_dir = data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(APP_NAME));
        Ok(Arc::new(Self {
            inner: ModelCoordinator::new(PathBuf::from(bundle_dir), default_dir, Arc::new(prefs), grants),
        }))
    }

    fn restore_access(&self) -> LmRestoreReport {
        let r = self.inner.restore_access();
        LmRestoreReport {
            restored: r.restored as u32,
            stale: r.stale as u32,
            removed: r.removed as u32,
        }
    }

    fn grant_access(&self, path: String) -> bool {
        self.inner.grant_access(Path::new(&path))
    }

    fn initialize_user_overlays(&self) -> Result<String, LmError> {
        let folder = self.inner.initialize_user_overlays()?;
        Ok(folder.to_string_lossy().into_owned())
    }

    fn reload_user_data(&self, kind: Option<LmUserDataKind>) {
        self.inner.reload_user_data(kind.map(Into::into));
    }

    fn load_all_dictionaries(&self, notify: bool) -> u64 {
        self.inner.load_all_dictionaries(notify)
    }

    fn load_variant(&self, variant: LmVariant, notify: bool) -> u64 {
        self.inner.load_variant(variant.into(), notify)
    }

    fn reload_factory_dictionaries(&self, current: LmVariant) -> u64 {
        self.inner.reload_factory_dictionaries(current.into())
    }

    fn poll_notifications(&self) -> Vec<LmNotification> {
        self.inner
            .poll_notifications()
            .into_iter()
            .map(Into::into)
            .collect()
    }

    fn is_loading(&self, variant: LmVariant) -> bool {
        self.inner.is_loading(variant.into())
    }

    fn set_feature_flag(&self, flag: LmFeature, enabled: bool) {
        self.inner.set_feature_flag(flag.into(), enabled);
    }

    fn set_year_offset(&self, delta: i32) {
        self.inner.set_year_offset(delta);
    }

    fn query(&self, variant: LmVariant, reading: String) -> Vec<LmCandidate> {
        self.inner
            .query(variant.into(), &reading)
            .into_iter()
            .map(Into::into)
            .collect()
    }

    fn record_override(&self, variant: LmVariant, context_key: String, candidate: String) {
        self.inner
            .record_override(variant.into(), &context_key, &candidate);
    }

    fn override_suggestions(&self, variant: LmVariant, context_key: String) -> Vec<LmSuggestion> {
        self.inner
            .override_suggestions(variant.into(), &context_key)
            .into_iter()
            .map(Into::into)
            .collect()
    }

    fn save_user_override_model_data(&self, wait: bool) -> bool {
        self.inner.save_user_override_model_data(wait)
    }

    fn bleach_specified_suggestions(&self, variant: LmVariant, targets: Vec<String>) -> u32 {
        let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
        self.inner
            .bleach_specified_suggestions(variant.into(), &targets) as u32
    }

    fn remove_unigrams_from_user_override_model(&self, variant: LmVariant) -> u32 {
        self.inner
            .remove_unigrams_from_user_override_model(variant.into()) as u32
    }

    fn clear_user_override_model_data(&self, variant: LmVariant) {
        self.inner.clear_user_override_model_data(variant.into());
    }

    fn relocate_wrecked_override_data(&self) -> Vec<String> {
        self.inner
            .relocate_wrecked_override_data()
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    fn write_user_phrase(
        &self,
        record: String,
        variant: LmVariant,
        duplicating: bool,
        deleting: bool,
    ) -> bool {
        self.inner
            .write_user_phrase(&record, variant.into(), duplicating, deleting)
    }

    fn has_pair(&self, variant: LmVariant, key: String, value: String, factory_only: bool) -> bool {
        let variant: LocaleVariant = variant.into();
        self.inner
            .get_model(variant)
            .has_pair(&key, &value, factory_only)
    }

    fn is_pair_filtered(&self, variant: LmVariant, key: String, value: String) -> bool {
        let variant: LocaleVariant = variant.into();
        self.inner.get_model(variant).is_pair_filtered(&key, &value)
    }

    fn associates_for(&self, variant: LmVariant, key: String) -> Vec<String> {
        let variant: LocaleVariant = variant.into();
        self.inner.get_model(variant).associates_for(&key)
    }

    fn data_folder_path(&self, use_default: bool) -> String {
        self.inner
            .location()
            .data_folder(use_default)
            .to_string_lossy()
            .into_owned()
    }

    fn reset_specified_user_data_folder(&self) -> Result<String, LmError> {
        let folder = self.inner.reset_specified_user_data_folder()?;
        Ok(folder.to_string_lossy().into_owned())
    }
}
