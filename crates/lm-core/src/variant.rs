use serde::{Deserialize, Serialize};

/// Writing-system variant selecting which composite model is active.
///
/// `Unset` is used when no input mode is selected; models and override stores
/// created for it are throwaway instances that never persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocaleVariant {
    Simplified,
    Traditional,
    Unset,
}

impl LocaleVariant {
    /// The variants that own a process-wide composite model.
    pub const CONCRETE: [LocaleVariant; 2] = [LocaleVariant::Simplified, LocaleVariant::Traditional];

    /// Short tag used in file names (`userdata-chs.txt`).
    pub fn tag(self) -> &'static str {
        match self {
            LocaleVariant::Simplified => "chs",
            LocaleVariant::Traditional => "cht",
            LocaleVariant::Unset => "dummy",
        }
    }

    /// Slot index for per-variant arrays; `None` for `Unset`.
    pub fn index(self) -> Option<usize> {
        match self {
            LocaleVariant::Simplified => Some(0),
            LocaleVariant::Traditional => Some(1),
            LocaleVariant::Unset => None,
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            LocaleVariant::Simplified => LocaleVariant::Traditional,
            LocaleVariant::Traditional => LocaleVariant::Simplified,
            LocaleVariant::Unset => LocaleVariant::Unset,
        }
    }

    pub fn is_concrete(self) -> bool {
        self != LocaleVariant::Unset
    }
}

impl std::fmt::Display for LocaleVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for LocaleVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chs" | "simplified" => Ok(LocaleVariant::Simplified),
            "cht" | "traditional" => Ok(LocaleVariant::Traditional),
            other => Err(format!("unknown variant: {other} (expected chs or cht)")),
        }
    }
}
