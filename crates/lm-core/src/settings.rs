//! Global engine tunables loaded from TOML.
//!
//! - `init_custom(toml_content)` sets a custom TOML before first `settings()` call
//! - `settings()` returns `&'static Settings` (lazy-init singleton)
//! - Default values are embedded via `include_str!("default_settings.toml")`

use std::sync::OnceLock;

use serde::Deserialize;

pub const DEFAULT_SETTINGS_TOML: &str = include_str!("default_settings.toml");

static CUSTOM_TOML: OnceLock<String> = OnceLock::new();

/// Set custom TOML before first `settings()` call.
pub fn init_custom(toml_content: String) -> Result<(), SettingsError> {
    parse_settings_toml(&toml_content)?;
    CUSTOM_TOML
        .set(toml_content)
        .map_err(|_| SettingsError::AlreadyInitialized)
}

/// Get or initialize the global settings singleton.
pub fn settings() -> &'static Settings {
    static INSTANCE: OnceLock<Settings> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let toml_str = CUSTOM_TOML
            .get()
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_SETTINGS_TOML);
        parse_settings_toml(toml_str).expect("settings TOML must be valid")
    })
}

/// Returns the embedded default settings TOML content.
pub fn default_toml() -> &'static str {
    DEFAULT_SETTINGS_TOML
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("settings already initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub learning: LearningSettings,
    pub loader: LoaderSettings,
}

/// Decay and capacity parameters of the override store.
///
/// An override pair with events `e_1..e_n` scores
/// `sum(w_i * 0.5^(age_i / half_life)) * (1 + frequency_weight * ln(n))`.
#[derive(Debug, Clone, Deserialize)]
pub struct LearningSettings {
    pub half_life_hours: f64,
    pub frequency_weight: f64,
    pub max_events_per_pair: usize,
    pub max_pairs: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderSettings {
    pub worker_threads: usize,
    pub save_wait_ms: u64,
}

pub fn parse_settings_toml(toml_str: &str) -> Result<Settings, SettingsError> {
    let s: Settings = toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate(&s)?;
    Ok(s)
}

fn validate(s: &Settings) -> Result<(), SettingsError> {
    macro_rules! check_positive_usize {
        ($section:ident . $field:ident) => {
            if s.$section.$field == 0 {
                return Err(SettingsError::InvalidValue {
                    field: concat!(stringify!($section), ".", stringify!($field)).to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        };
    }

    if !(s.learning.half_life_hours > 0.0) {
        return Err(SettingsError::InvalidValue {
            field: "learning.half_life_hours".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    if !(s.learning.frequency_weight >= 0.0) {
        return Err(SettingsError::InvalidValue {
            field: "learning.frequency_weight".to_string(),
            reason: "must be non-negative".to_string(),
        });
    }
    check_positive_usize!(learning.max_events_per_pair);
    check_positive_usize!(learning.max_pairs);
    check_positive_usize!(loader.worker_threads);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_default_toml() {
        let s = parse_settings_toml(DEFAULT_SETTINGS_TOML).unwrap();
        assert!((s.learning.half_life_hours - 168.0).abs() < f64::EPSILON);
        assert!((s.learning.frequency_weight - 0.5).abs() < f64::EPSILON);
        assert_eq!(s.learning.max_events_per_pair, 16);
        assert_eq!(s.learning.max_pairs, 20000);
        assert_eq!(s.loader.worker_threads, 4);
        assert_eq!(s.loader.save_wait_ms, 2000);
    }

    #[test]
    fn parse_valid_custom_toml() {
        let toml = r#"
[learning]
half_life_hours = 24.0
frequency_weight = 0.0
max_events_per_pair = 4
max_pairs = 100

[loader]
worker_threads = 1
save_wait_ms = 10
"#;
        let s = parse_settings_toml(toml).unwrap();
        assert_eq!(s.learning.max_pairs, 100);
        assert_eq!(s.loader.worker_threads, 1);
    }

    #[test]
    fn error_zero_half_life() {
        let toml = r#"
[learning]
half_life_hours = 0.0
frequency_weight = 0.5
max_events_per_pair = 16
max_pairs = 20000

[loader]
worker_threads = 4
save_wait_ms = 2000
"#;
        let err = parse_settings_toml(toml).unwrap_err();
        assert!(err.to_string().contains("half_life_hours"));
    }

    #[test]
    fn error_zero_workers() {
        let toml = r#"
[learning]
half_life_hours = 168.0
frequency_weight = 0.5
max_events_per_pair = 16
max_pairs = 20000

[loader]
worker_threads = 0
save_wait_ms = 2000
"#;
        let err = parse_settings_toml(toml).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));
        assert!(err.to_string().contains("loader.worker_threads"));
    }

    #[test]
    fn error_invalid_toml() {
        let err = parse_settings_toml("not valid toml {{{").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn error_missing_section() {
        let toml = r#"
[learning]
half_life_hours = 168.0
frequency_weight = 0.5
max_events_per_pair = 16
max_pairs = 20000
"#;
        let err = parse_settings_toml(toml).unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
