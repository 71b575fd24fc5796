use std::path::{Path, PathBuf};
use std::sync::Arc;

use lm_core::location::{
    check_if_specified_folder_valid, default_data_dir, DataLocation, UserDataKind, APP_NAME,
};
use lm_core::prefs::{PreferenceStore, Preferences};
use lm_core::variant::LocaleVariant;

pub struct ResolveOptions<'a> {
    pub prefs: Option<&'a Path>,
    pub data_dir: Option<&'a Path>,
    /// Store this folder as the user's choice before resolving.
    pub set_folder: Option<&'a str>,
    pub use_default: bool,
    /// Create the folder and seed missing user files.
    pub ensure: bool,
}

pub fn open_location(prefs: Option<&Path>, data_dir: Option<&Path>) -> DataLocation {
    let store = match prefs {
        Some(p) => die!(
            PreferenceStore::open(p),
            "Error opening preferences {}: {}",
            p.display()
        ),
        None => PreferenceStore::in_memory(Preferences::default()),
    };
    let default_dir = data_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_data_dir(APP_NAME));
    DataLocation::new(default_dir, Arc::new(store))
}

/// Print where user data and override files live. Returns the folder.
pub fn resolve(opts: &ResolveOptions) -> PathBuf {
    let location = open_location(opts.prefs, opts.data_dir);

    if let Some(folder) = opts.set_folder {
        if !check_if_specified_folder_valid(folder) {
            eprintln!("Error: {folder} is not a writable folder");
            std::process::exit(1);
        }
        let folder = folder.to_string();
        die!(
            location
                .prefs()
                .update(|p| p.user_data_folder_specified = Some(folder)),
            "Error saving preferences: {}"
        );
    }

    let folder = if opts.ensure {
        let folder = die!(location.ensure_user_data_folder(), "Error: {}");
        for variant in LocaleVariant::CONCRETE {
            die!(
                location.ensure_user_files(&folder, variant),
                "Error seeding user files: {}"
            );
        }
        folder
    } else {
        location.data_folder(opts.use_default)
    };

    println!("data folder:\t{}", folder.display());
    for variant in LocaleVariant::CONCRETE {
        println!(
            "overrides ({variant}):\t{}",
            location.override_data_path(variant).display()
        );
        for kind in UserDataKind::ALL {
            let path = folder.join(kind.file_name(variant));
            let mark = if path.exists() { "" } else { " (missing)" };
            println!("  {}{mark}", path.display());
        }
    }
    folder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_folder_is_persisted_and_seeded() {
        let root = tempfile::tempdir().unwrap();
        let prefs = root.path().join("prefs.toml");
        let default = root.path().join("support").join(APP_NAME);
        let chosen = root.path().join("chosen");
        std::fs::create_dir(&chosen).unwrap();
        let chosen_str = chosen.to_string_lossy().into_owned();

        let folder = resolve(&ResolveOptions {
            prefs: Some(prefs.as_path()),
            data_dir: Some(default.as_path()),
            set_folder: Some(chosen_str.as_str()),
            use_default: false,
            ensure: true,
        });
        assert_eq!(folder, chosen);
        assert!(chosen.join("userdata-cht.txt").exists());

        let folder = resolve(&ResolveOptions {
            prefs: Some(prefs.as_path()),
            data_dir: Some(default.as_path()),
            set_folder: None,
            use_default: true,
            ensure: false,
        });
        assert_eq!(folder, default);
    }
}
