//! UniFFI export layer for host input-method apps.
//!
//! Each public type here maps to a generated Swift class, struct, or enum.

mod coordinator;
mod types;

pub use coordinator::LmCoordinator;
pub use types::{
    LmCandidate, LmError, LmFeature, LmNotification, LmRestoreReport, LmSuggestion,
    LmUserDataKind, LmVariant,
};

use std::path::Path;

// ---------------------------------------------------------------------------
// Top-level functions
// ---------------------------------------------------------------------------

#[uniffi::export]
fn engine_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[uniffi::export]
fn settings_load_config(path: String) -> Result<(), LmError> {
    let content = std::fs::read_to_string(&path).map_err(|e| LmError::Io {
        msg: format!("{path}: {e}"),
    })?;
    lm_core::settings::init_custom(content)
        .map_err(|e| LmError::InvalidData { msg: e.to_string() })?;
    Ok(())
}

#[uniffi::export]
fn settings_default_config() -> String {
    lm_core::settings::default_toml().to_string()
}

/// Whether `path` can serve as the user data folder. `~` is expanded.
#[uniffi::export]
fn check_data_folder_valid(path: String) -> bool {
    lm_core::location::check_if_specified_folder_valid(&path)
}

#[uniffi::export]
fn trace_init(log_dir: String) {
    crate::trace_init::init_tracing(Path::new(&log_dir));
}
