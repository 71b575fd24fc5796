use lm_core::location::{LocationError, UserDataKind};
use lm_core::model::{Candidate, FeatureFlag};
use lm_core::override_store::ScoredCandidate;
use lm_core::variant::LocaleVariant;

use crate::loader::LoadNotification;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum LmError {
    /// Neither the chosen nor the default data folder is writable.
    #[error("no writable user data location")]
    NoWritableLocation,
    #[error("IO error: {msg}")]
    Io { msg: String },
    #[error("invalid data: {msg}")]
    InvalidData { msg: String },
}

impl From<LocationError> for LmError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::NoWritableLocation => LmError::NoWritableLocation,
            other => LmError::Io {
                msg: other.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Clone, uniffi::Record)]
pub struct LmCandidate {
    pub value: String,
    pub weight: f64,
    pub from_user: bool,
}

impl From<Candidate> for LmCandidate {
    fn from(c: Candidate) -> Self {
        Self {
            value: c.value,
            weight: c.weight,
            from_user: c.from_user,
        }
    }
}

#[derive(Clone, uniffi::Record)]
pub struct LmSuggestion {
    pub candidate: String,
    pub weight: f64,
    pub last_used: u64,
}

impl From<ScoredCandidate> for LmSuggestion {
    fn from(s: ScoredCandidate) -> Self {
        Self {
            candidate: s.candidate,
            weight: s.weight,
            last_used: s.last_used,
        }
    }
}

#[derive(uniffi::Record)]
pub struct LmRestoreReport {
    pub restored: u32,
    pub stale: u32,
    pub removed: u32,
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, uniffi::Enum)]
pub enum LmVariant {
    Simplified,
    Traditional,
    Unset,
}

impl From<LmVariant> for LocaleVariant {
    fn from(v: LmVariant) -> Self {
        match v {
            LmVariant::Simplified => LocaleVariant::Simplified,
            LmVariant::Traditional => LocaleVariant::Traditional,
            LmVariant::Unset => LocaleVariant::Unset,
        }
    }
}

#[derive(Clone, Copy, Debug, uniffi::Enum)]
pub enum LmFeature {
    PhraseReplacement,
    Filter,
    Cns,
    Symbol,
    Scpc,
    Associates,
}

impl From<LmFeature> for FeatureFlag {
    fn from(f: LmFeature) -> Self {
        match f {
            LmFeature::PhraseReplacement => FeatureFlag::PhraseReplacement,
            LmFeature::Filter => FeatureFlag::Filter,
            LmFeature::Cns => FeatureFlag::Cns,
            LmFeature::Symbol => FeatureFlag::Symbol,
            LmFeature::Scpc => FeatureFlag::Scpc,
            LmFeature::Associates => FeatureFlag::Associates,
        }
    }
}

#[derive(Clone, Copy, Debug, uniffi::Enum)]
pub enum LmUserDataKind {
    Phrases,
    Filter,
    Replacements,
    Associates,
    Symbols,
    Scpc,
}

impl From<LmUserDataKind> for UserDataKind {
    fn from(k: LmUserDataKind) -> Self {
        match k {
            LmUserDataKind::Phrases => UserDataKind::Phrases,
            LmUserDataKind::Filter => UserDataKind::Filter,
            LmUserDataKind::Replacements => UserDataKind::Replacements,
            LmUserDataKind::Associates => UserDataKind::Associates,
            LmUserDataKind::Symbols => UserDataKind::Symbols,
            LmUserDataKind::Scpc => UserDataKind::Scpc,
        }
    }
}

/// Loader progress, drained by the host's UI thread.
#[derive(Clone, Debug, uniffi::Enum)]
pub enum LmNotification {
    LoadStarted {
        ticket: u64,
        units: u32,
    },
    LoadCompleted {
        ticket: u64,
        units: u32,
        failed: Vec<String>,
        announce: bool,
    },
}

impl From<LoadNotification> for LmNotification {
    fn from(n: LoadNotification) -> Self {
        match n {
            LoadNotification::Started { ticket, units } => LmNotification::LoadStarted {
                ticket,
                units: units as u32,
            },
            LoadNotification::Completed {
                ticket,
                units,
                failures,
                announce,
            } => LmNotification::LoadCompleted {
                ticket,
                units: units as u32,
                failed: failures.into_iter().map(|f| f.label).collect(),
                announce,
            },
        }
    }
}
