//! Composite per-variant language model.
//!
//! A `CompositeModel` unions the factory dictionary sets of one locale variant
//! with the user overlay tables and owns that variant's override store. All
//! state sits behind interior locks so the model can be shared by reference
//! between the UI thread (flag changes, queries) and load workers (bulk
//! population of one set at a time).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::dict::{DictEntry, DictError, Dictionary, DictionarySet, PhraseTable};
use crate::fsutil::current_date;
use crate::location::UserDataKind;
use crate::override_store::{OverrideStore, ScoredCandidate};
use crate::variant::LocaleVariant;

const MACRO_YEAR: &str = "MACRO@YEAR";
const MACRO_DATE: &str = "MACRO@DATE";

/// Factory resources shipped with the application bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorySet {
    /// The large per-variant reading table.
    Core,
    /// CNS 11643 character coverage, shared by both variants.
    Cns,
    /// Miscellaneous readings (zhuyin letters, punctuation).
    Misc,
    Symbols,
}

impl FactorySet {
    pub const ALL: [FactorySet; 4] = [
        FactorySet::Core,
        FactorySet::Cns,
        FactorySet::Misc,
        FactorySet::Symbols,
    ];

    fn index(self) -> usize {
        match self {
            FactorySet::Core => 0,
            FactorySet::Cns => 1,
            FactorySet::Misc => 2,
            FactorySet::Symbols => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FactorySet::Core => "core",
            FactorySet::Cns => "cns",
            FactorySet::Misc => "misc",
            FactorySet::Symbols => "symbols",
        }
    }

    /// Bundle file name for `variant`.
    pub fn resource_name(self, variant: LocaleVariant) -> String {
        match self {
            FactorySet::Core => format!("data-{}.json", variant.tag()),
            FactorySet::Cns => "data-cns.json".to_string(),
            FactorySet::Misc => "data-zhuyinwen.json".to_string(),
            FactorySet::Symbols => "data-symbols.json".to_string(),
        }
    }
}

/// Runtime toggles, independent of load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureFlag {
    PhraseReplacement,
    Filter,
    Cns,
    Symbol,
    Scpc,
    Associates,
}

impl FeatureFlag {
    pub const ALL: [FeatureFlag; 6] = [
        FeatureFlag::PhraseReplacement,
        FeatureFlag::Filter,
        FeatureFlag::Cns,
        FeatureFlag::Symbol,
        FeatureFlag::Scpc,
        FeatureFlag::Associates,
    ];

    fn index(self) -> usize {
        match self {
            FeatureFlag::PhraseReplacement => 0,
            FeatureFlag::Filter => 1,
            FeatureFlag::Cns => 2,
            FeatureFlag::Symbol => 3,
            FeatureFlag::Scpc => 4,
            FeatureFlag::Associates => 5,
        }
    }

    fn default_enabled(self) -> bool {
        matches!(self, FeatureFlag::Filter | FeatureFlag::Symbol)
    }
}

fn user_index(kind: UserDataKind) -> usize {
    match kind {
        UserDataKind::Phrases => 0,
        UserDataKind::Filter => 1,
        UserDataKind::Replacements => 2,
        UserDataKind::Associates => 3,
        UserDataKind::Symbols => 4,
        UserDataKind::Scpc => 5,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub value: String,
    pub weight: f64,
    pub from_user: bool,
}

pub struct CompositeModel {
    variant: LocaleVariant,
    factory: [DictionarySet; 4],
    user: [RwLock<PhraseTable>; 6],
    flags: [AtomicBool; 6],
    year_offset: AtomicI32,
    overrides: OverrideStore,
}

impl CompositeModel {
    /// A model whose override store persists to `override_path`.
    pub fn new(variant: LocaleVariant, override_path: Option<PathBuf>) -> Self {
        Self {
            variant,
            factory: FactorySet::ALL.map(|s| DictionarySet::new(s.label())),
            user: Default::default(),
            flags: FeatureFlag::ALL.map(|f| AtomicBool::new(f.default_enabled())),
            year_offset: AtomicI32::new(0),
            overrides: match override_path {
                Some(path) => OverrideStore::new(path),
                None => OverrideStore::ephemeral(),
            },
        }
    }

    /// Throwaway model for the `Unset` variant. Never persisted.
    pub fn ephemeral() -> Self {
        Self::new(LocaleVariant::Unset, None)
    }

    pub fn variant(&self) -> LocaleVariant {
        self.variant
    }

    pub fn factory(&self, set: FactorySet) -> &DictionarySet {
        &self.factory[set.index()]
    }

    pub fn is_loaded(&self, set: FactorySet) -> bool {
        self.factory(set).is_loaded()
    }

    pub fn core_loaded(&self) -> bool {
        self.is_loaded(FactorySet::Core)
    }

    /// Load one factory set from `bundle_dir`. No-op if already loaded.
    pub fn load_factory(&self, set: FactorySet, bundle_dir: &Path) -> Result<bool, DictError> {
        let path = bundle_dir.join(set.resource_name(self.variant));
        self.factory(set).load_json(&path)
    }

    /// Clear every factory loaded flag so the next load parses again.
    pub fn reset_factory_data(&self) {
        for set in &self.factory {
            set.reset();
        }
        debug!(variant = %self.variant, "factory data reset");
    }

    pub fn set_feature(&self, flag: FeatureFlag, enabled: bool) {
        self.flags[flag.index()].store(enabled, Ordering::Release);
    }

    pub fn feature(&self, flag: FeatureFlag) -> bool {
        self.flags[flag.index()].load(Ordering::Acquire)
    }

    pub fn set_year_offset(&self, delta: i32) {
        self.year_offset.store(delta, Ordering::Release);
    }

    pub fn year_offset(&self) -> i32 {
        self.year_offset.load(Ordering::Acquire)
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    /// Replace one overlay table from its text file. A missing file leaves
    /// the overlay empty.
    pub fn load_user_data(&self, kind: UserDataKind, path: &Path) -> Result<(), DictError> {
        let table = match PhraseTable::open_text(path, kind.text_format()) {
            Ok(t) => t,
            Err(DictError::Missing(_)) => PhraseTable::new(),
            Err(e) => return Err(e),
        };
        let (keys, entries) = table.stats();
        *self.user[user_index(kind)].write().unwrap() = table;
        debug!(variant = %self.variant, ?kind, keys, entries, "user overlay loaded");
        Ok(())
    }

    /// Load every overlay from `folder`, logging failures.
    pub fn load_user_folder(&self, folder: &Path, kinds: &[UserDataKind]) -> usize {
        let mut loaded = 0;
        for &kind in kinds {
            let path = folder.join(kind.file_name(self.variant));
            match self.load_user_data(kind, &path) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "user overlay failed to load"),
            }
        }
        loaded
    }

    fn user_table(&self, kind: UserDataKind) -> std::sync::RwLockReadGuard<'_, PhraseTable> {
        self.user[user_index(kind)].read().unwrap()
    }

    /// Factory sets consulted under the current flags.
    fn active_factory(&self) -> impl Iterator<Item = &DictionarySet> {
        FactorySet::ALL
            .into_iter()
            .filter(|s| match s {
                FactorySet::Cns => self.feature(FeatureFlag::Cns),
                FactorySet::Symbols => self.feature(FeatureFlag::Symbol),
                _ => true,
            })
            .map(|s| self.factory(s))
    }

    /// Candidates for a reading, best first.
    ///
    /// User phrases come before factory entries. Filtered pairs are dropped,
    /// replacements applied, date macros expanded, duplicates removed.
    pub fn query(&self, reading: &str) -> Vec<Candidate> {
        let mut raw: Vec<Candidate> = Vec::new();
        let user = |entries: Vec<DictEntry>| {
            entries.into_iter().map(|e| Candidate {
                value: e.value,
                weight: e.weight,
                from_user: true,
            })
        };

        if self.feature(FeatureFlag::Scpc) {
            raw.extend(user(self.user_table(UserDataKind::Scpc).lookup(reading)));
        }
        raw.extend(user(self.user_table(UserDataKind::Phrases).lookup(reading)));
        if self.feature(FeatureFlag::Symbol) {
            raw.extend(user(self.user_table(UserDataKind::Symbols).lookup(reading)));
        }

        let mut factory: Vec<Candidate> = self
            .active_factory()
            .flat_map(|set| set.lookup(reading))
            .map(|e| Candidate {
                value: e.value,
                weight: e.weight,
                from_user: false,
            })
            .collect();
        factory.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        raw.extend(factory);

        let filter_on = self.feature(FeatureFlag::Filter);
        let replace_on = self.feature(FeatureFlag::PhraseReplacement);
        let scpc_on = self.feature(FeatureFlag::Scpc);
        let filter = self.user_table(UserDataKind::Filter);
        let replacements = self.user_table(UserDataKind::Replacements);

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(raw.len());
        for mut cand in raw {
            if filter_on && filter.has_pair(reading, &cand.value) {
                continue;
            }
            if replace_on {
                if let Some(rep) = replacements.get(&cand.value).first() {
                    cand.value = rep.value.clone();
                }
            }
            cand.value = self.expand_macro(&cand.value);
            if scpc_on && cand.value.chars().count() != 1 {
                continue;
            }
            if seen.insert(cand.value.clone()) {
                out.push(cand);
            }
        }
        out
    }

    fn expand_macro(&self, value: &str) -> String {
        if value != MACRO_YEAR && value != MACRO_DATE {
            return value.to_string();
        }
        let (year, month, day) = current_date();
        let year = year + self.year_offset();
        if value == MACRO_YEAR {
            year.to_string()
        } else {
            format!("{year}-{month:02}-{day:02}")
        }
    }

    /// Record that the user picked `candidate` at `context_key`.
    pub fn record_override(&self, context_key: &str, candidate: &str, at: u64) {
        self.overrides.record_override(context_key, candidate, at);
    }

    pub fn override_suggestions(&self, context_key: &str, now: u64) -> Vec<ScoredCandidate> {
        self.overrides.score(context_key, now)
    }

    /// Whether `value` is listed for `key`, in factory data only or also in
    /// the user phrases.
    pub fn has_pair(&self, key: &str, value: &str, factory_only: bool) -> bool {
        self.count_pairs(key, value, factory_only) > 0
    }

    /// Number of tables listing the pair.
    pub fn count_pairs(&self, key: &str, value: &str, factory_only: bool) -> usize {
        let mut count = FactorySet::ALL
            .iter()
            .filter(|s| self.factory(**s).has_pair(key, value))
            .count();
        if !factory_only {
            for kind in [UserDataKind::Phrases, UserDataKind::Symbols] {
                if self.user_table(kind).has_pair(key, value) {
                    count += 1;
                }
            }
        }
        count
    }

    pub fn is_pair_filtered(&self, key: &str, value: &str) -> bool {
        self.user_table(UserDataKind::Filter).has_pair(key, value)
    }

    /// Follow-up phrases for `key`, empty unless associates are enabled.
    pub fn associates_for(&self, key: &str) -> Vec<String> {
        if !self.feature(FeatureFlag::Associates) {
            return Vec::new();
        }
        self.user_table(UserDataKind::Associates)
            .lookup(key)
            .into_iter()
            .map(|e| e.value)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn bundle() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("data-cht.json"),
            r#"{"ni3-hao3": [["你好", -4.0], ["妳好", -6.0]], "nian2": [["年", -3.0], ["MACRO@YEAR", -9.0]]}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("data-cns.json"),
            r#"{"ni3-hao3": [["伱好", -5.0]]}"#,
        )
        .unwrap();
        fs::write(dir.path().join("data-zhuyinwen.json"), r#"{"_punc": [["，", 0.0]]}"#).unwrap();
        fs::write(dir.path().join("data-symbols.json"), r#"{"_star": [["★", 0.0]]}"#).unwrap();
        dir
    }

    fn loaded_model(bundle: &Path) -> CompositeModel {
        let model = CompositeModel::new(LocaleVariant::Traditional, None);
        for set in FactorySet::ALL {
            model.load_factory(set, bundle).unwrap();
        }
        model
    }

    fn values(cands: &[Candidate]) -> Vec<&str> {
        cands.iter().map(|c| c.value.as_str()).collect()
    }

    #[test]
    fn factory_resources_follow_variant() {
        assert_eq!(
            FactorySet::Core.resource_name(LocaleVariant::Simplified),
            "data-chs.json"
        );
        assert_eq!(
            FactorySet::Misc.resource_name(LocaleVariant::Traditional),
            "data-zhuyinwen.json"
        );
    }

    #[test]
    fn query_orders_factory_by_weight_and_honors_cns_flag() {
        let dir = bundle();
        let model = loaded_model(dir.path());
        assert_eq!(values(&model.query("ni3-hao3")), vec!["你好", "妳好"]);

        model.set_feature(FeatureFlag::Cns, true);
        assert_eq!(values(&model.query("ni3-hao3")), vec!["你好", "伱好", "妳好"]);
    }

    #[test]
    fn user_phrases_come_first_and_filter_hides() {
        let dir = bundle();
        let model = loaded_model(dir.path());
        let user = dir.path().join("userdata-cht.txt");
        fs::write(&user, "妳好 ni3-hao3\n").unwrap();
        model.load_user_data(UserDataKind::Phrases, &user).unwrap();
        let filter = dir.path().join("exclude-phrases-cht.txt");
        fs::write(&filter, "你好 ni3-hao3\n").unwrap();
        model.load_user_data(UserDataKind::Filter, &filter).unwrap();

        let cands = model.query("ni3-hao3");
        assert_eq!(values(&cands), vec!["妳好"]);
        assert!(cands[0].from_user);
        assert!(model.is_pair_filtered("ni3-hao3", "你好"));

        model.set_feature(FeatureFlag::Filter, false);
        assert_eq!(values(&model.query("ni3-hao3")), vec!["妳好", "你好"]);
    }

    #[test]
    fn replacement_applies_only_when_enabled() {
        let dir = bundle();
        let model = loaded_model(dir.path());
        let rep = dir.path().join("phrases-replacement-cht.txt");
        fs::write(&rep, "妳好 您好\n").unwrap();
        model.load_user_data(UserDataKind::Replacements, &rep).unwrap();

        assert_eq!(values(&model.query("ni3-hao3")), vec!["你好", "妳好"]);
        model.set_feature(FeatureFlag::PhraseReplacement, true);
        assert_eq!(values(&model.query("ni3-hao3")), vec!["你好", "您好"]);
    }

    #[test]
    fn year_macro_uses_offset() {
        let dir = bundle();
        let model = loaded_model(dir.path());
        model.set_year_offset(-1911);
        let (year, _, _) = current_date();
        let cands = model.query("nian2");
        assert_eq!(cands[1].value, (year - 1911).to_string());
    }

    #[test]
    fn symbols_follow_symbol_flag() {
        let dir = bundle();
        let model = loaded_model(dir.path());
        assert_eq!(values(&model.query("_star")), vec!["★"]);
        model.set_feature(FeatureFlag::Symbol, false);
        assert!(model.query("_star").is_empty());
    }

    #[test]
    fn scpc_mode_keeps_single_characters() {
        let dir = bundle();
        let model = loaded_model(dir.path());
        model.set_feature(FeatureFlag::Scpc, true);
        assert!(model.query("ni3-hao3").is_empty());
        assert_eq!(values(&model.query("nian2"))[0], "年");
    }

    #[test]
    fn pair_queries() {
        let dir = bundle();
        let model = loaded_model(dir.path());
        assert!(model.has_pair("ni3-hao3", "你好", true));
        assert!(!model.has_pair("ni3-hao3", "您好", false));

        let user = dir.path().join("userdata-cht.txt");
        fs::write(&user, "你好 ni3-hao3\n").unwrap();
        model.load_user_data(UserDataKind::Phrases, &user).unwrap();
        assert_eq!(model.count_pairs("ni3-hao3", "你好", true), 1);
        assert_eq!(model.count_pairs("ni3-hao3", "你好", false), 2);
    }

    #[test]
    fn associates_gated_by_flag() {
        let dir = bundle();
        let model = loaded_model(dir.path());
        let path = dir.path().join("associatedPhrases-cht.txt");
        fs::write(&path, "你 好 們\n").unwrap();
        model.load_user_data(UserDataKind::Associates, &path).unwrap();

        assert!(model.associates_for("你").is_empty());
        model.set_feature(FeatureFlag::Associates, true);
        assert_eq!(model.associates_for("你"), vec!["好", "們"]);
    }

    #[test]
    fn reset_clears_loaded_flags() {
        let dir = bundle();
        let model = loaded_model(dir.path());
        assert!(model.core_loaded());
        model.reset_factory_data();
        assert!(FactorySet::ALL.iter().all(|s| !model.is_loaded(*s)));
        assert!(model.query("ni3-hao3").is_empty());
    }

    #[test]
    fn missing_user_file_leaves_empty_overlay() {
        let model = CompositeModel::ephemeral();
        model
            .load_user_data(UserDataKind::Phrases, Path::new("/nonexistent/userdata.txt"))
            .unwrap();
        assert!(model.query("x").is_empty());
    }

    #[test]
    fn override_routes_to_store() {
        let model = CompositeModel::ephemeral();
        model.record_override("ni3 hao3", "你好", 100);
        assert_eq!(model.override_suggestions("ni3 hao3", 100)[0].candidate, "你好");
        assert!(model.overrides().data_path().is_none());
    }
}
