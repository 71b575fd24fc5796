//! Resolution of the user-data folder and the files that live in it.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dict::TextFormat;
use crate::error::ErrorKind;
use crate::fsutil::timestamp_tag;
use crate::prefs::PreferenceStore;
use crate::variant::LocaleVariant;

pub const APP_NAME: &str = "LmEngine";

const WRITE_CHECK_NAME: &str = ".lm-write-check";
const WRITE_CHECK_ATTEMPTS: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("{0} exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("{0} is not writable")]
    NotWritable(PathBuf),

    #[error("no writable user data location")]
    NoWritableLocation,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl LocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LocationError::NotADirectory(_) => ErrorKind::ResourceMissing,
            LocationError::NotWritable(_) | LocationError::NoWritableLocation => {
                ErrorKind::PermissionDenied
            }
            LocationError::Io(e) => ErrorKind::of_io(e),
        }
    }
}

/// User-editable files kept per variant in the data folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserDataKind {
    Phrases,
    Filter,
    Replacements,
    Associates,
    Symbols,
    /// Single-character sequences for per-character typing mode.
    Scpc,
}

impl UserDataKind {
    pub const ALL: [UserDataKind; 6] = [
        UserDataKind::Phrases,
        UserDataKind::Filter,
        UserDataKind::Replacements,
        UserDataKind::Associates,
        UserDataKind::Symbols,
        UserDataKind::Scpc,
    ];

    pub fn file_name(self, variant: LocaleVariant) -> String {
        let stem = match self {
            UserDataKind::Phrases => "userdata",
            UserDataKind::Filter => "exclude-phrases",
            UserDataKind::Replacements => "phrases-replacement",
            UserDataKind::Associates => "associatedPhrases",
            UserDataKind::Symbols => "usersymbolphrases",
            UserDataKind::Scpc => "data-plain-bpmf",
        };
        format!("{stem}-{}.txt", variant.tag())
    }

    /// Seed content for a freshly created file.
    pub fn template(self, variant: LocaleVariant) -> &'static str {
        match self {
            UserDataKind::Phrases => include_str!("templates/user-phrases.txt"),
            UserDataKind::Filter => include_str!("templates/exclude-phrases.txt"),
            UserDataKind::Replacements => include_str!("templates/phrases-replacement.txt"),
            UserDataKind::Symbols => include_str!("templates/user-symbol-phrases.txt"),
            UserDataKind::Associates => match variant {
                LocaleVariant::Simplified => include_str!("templates/associated-phrases-chs.txt"),
                _ => include_str!("templates/associated-phrases-cht.txt"),
            },
            UserDataKind::Scpc => "",
        }
    }

    pub fn text_format(self) -> TextFormat {
        match self {
            UserDataKind::Replacements => TextFormat::Replacements,
            UserDataKind::Associates => TextFormat::Associates,
            _ => TextFormat::Phrases,
        }
    }

    /// Files the phrase editor rewrites through the consolidator.
    pub fn is_consolidated(self) -> bool {
        matches!(
            self,
            UserDataKind::Phrases | UserDataKind::Filter | UserDataKind::Symbols
        )
    }
}

/// Platform application-support folder for `app`.
pub fn default_data_dir(app: &str) -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    if cfg!(target_os = "macos") {
        PathBuf::from(format!("{home}/Library/Application Support/{app}"))
    } else if cfg!(windows) {
        match std::env::var("APPDATA") {
            Ok(appdata) => PathBuf::from(appdata).join(app),
            Err(_) => PathBuf::from(home).join(app),
        }
    } else {
        match std::env::var("XDG_DATA_HOME") {
            Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join(app),
            _ => PathBuf::from(format!("{home}/.local/share/{app}")),
        }
    }
}

/// Persisted override model for `variant`, kept beside the default data
/// folder so it survives a change of the user-chosen folder.
pub fn override_data_path(default_dir: &Path, variant: LocaleVariant) -> PathBuf {
    let name = format!("lm_override-model-data-{}.dat", variant.tag());
    match default_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => default_dir.join(name),
    }
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(format!("{home}{}", &path[1..]));
        }
    }
    PathBuf::from(path)
}

/// Comparison form of a directory path with exactly one trailing separator.
/// Callers expand tildes first.
fn normalized(path: &Path) -> String {
    let mut s = path.to_string_lossy().trim_end_matches(MAIN_SEPARATOR).to_string();
    s.push(MAIN_SEPARATOR);
    s
}

pub fn same_folder(a: &Path, b: &Path) -> bool {
    normalized(a) == normalized(b)
}

/// Existing directory that accepts new files.
///
/// Creates and removes a uniquely named marker file. A name collision with a
/// leftover file says nothing about writability, so it retries under a new
/// name.
pub fn is_valid_folder(path: &Path) -> bool {
    static SEQ: AtomicU32 = AtomicU32::new(0);

    if !path.is_dir() {
        return false;
    }
    for _ in 0..WRITE_CHECK_ATTEMPTS {
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let marker = path.join(format!("{WRITE_CHECK_NAME}-{}-{seq}", std::process::id()));
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => {
                let _ = fs::remove_file(&marker);
                return true;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "folder is not writable");
                return false;
            }
        }
    }
    false
}

/// Result of [`resolve_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: PathBuf,
    /// The specified folder was rejected; its preference should be cleared.
    pub rejected: Option<PathBuf>,
}

/// Pick the effective data folder.
///
/// The default is returned without probing anything when requested, when
/// nothing is specified, or when the specified folder names the default.
pub fn resolve_path(specified: Option<&str>, default: &Path, use_default: bool) -> Resolution {
    let default_result = Resolution {
        path: default.to_path_buf(),
        rejected: None,
    };
    let Some(specified) = specified.filter(|s| !s.trim().is_empty()) else {
        return default_result;
    };
    let specified = expand_tilde(specified);
    if use_default || same_folder(&specified, default) {
        return default_result;
    }
    if is_valid_folder(&specified) {
        return Resolution {
            path: specified,
            rejected: None,
        };
    }
    Resolution {
        path: default.to_path_buf(),
        rejected: Some(specified),
    }
}

/// Make `path` an existing directory.
///
/// A plain file squatting on the default folder is renamed aside first; a
/// file at any other requested location is left alone and reported.
pub fn ensure_directory(path: &Path, default: &Path) -> Result<(), LocationError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            if !same_folder(path, default) {
                return Err(LocationError::NotADirectory(path.to_path_buf()));
            }
            let mut aside = path.as_os_str().to_os_string();
            aside.push(format!("-{}", timestamp_tag()));
            let aside = PathBuf::from(aside);
            fs::rename(path, &aside)?;
            warn!(from = %path.display(), to = %aside.display(), "moved file blocking default data folder");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(path)?;
    debug!(path = %path.display(), "created data folder");
    Ok(())
}

fn prepare_folder(path: &Path, default: &Path) -> Result<(), LocationError> {
    ensure_directory(path, default)?;
    if !is_valid_folder(path) {
        return Err(LocationError::NotWritable(path.to_path_buf()));
    }
    Ok(())
}

/// Create `path` seeded with `template` unless it exists. Never overwrites.
/// Returns whether a file was created.
pub fn ensure_file_exists(path: &Path, template: &str) -> Result<bool, LocationError> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(template.as_bytes())?;
    Ok(true)
}

/// The user-data folder as configured by preferences.
pub struct DataLocation {
    default_dir: PathBuf,
    prefs: Arc<PreferenceStore>,
}

impl DataLocation {
    pub fn new(default_dir: PathBuf, prefs: Arc<PreferenceStore>) -> Self {
        Self { default_dir, prefs }
    }

    pub fn default_dir(&self) -> &Path {
        &self.default_dir
    }

    pub fn prefs(&self) -> &Arc<PreferenceStore> {
        &self.prefs
    }

    /// Effective data folder. An invalid specified folder is forgotten.
    pub fn data_folder(&self, use_default: bool) -> PathBuf {
        let specified = self.prefs.specified_folder();
        let resolution = resolve_path(specified.as_deref(), &self.default_dir, use_default);
        if let Some(rejected) = &resolution.rejected {
            info!(rejected = %rejected.display(), "specified data folder invalid, using default");
            self.prefs.clear_specified_folder();
        }
        resolution.path
    }

    pub fn override_data_path(&self, variant: LocaleVariant) -> PathBuf {
        override_data_path(&self.default_dir, variant)
    }

    pub fn user_file(&self, kind: UserDataKind, variant: LocaleVariant) -> PathBuf {
        self.data_folder(false).join(kind.file_name(variant))
    }

    /// Resolve and create the data folder, falling back to the default.
    ///
    /// Fails only when neither the specified nor the default folder can be
    /// made writable.
    pub fn ensure_user_data_folder(&self) -> Result<PathBuf, LocationError> {
        let folder = self.data_folder(false);
        match prepare_folder(&folder, &self.default_dir) {
            Ok(()) => return Ok(folder),
            Err(e) => warn!(path = %folder.display(), error = %e, "data folder unusable"),
        }
        if same_folder(&folder, &self.default_dir) {
            return Err(LocationError::NoWritableLocation);
        }
        self.prefs.clear_specified_folder();
        match prepare_folder(&self.default_dir, &self.default_dir) {
            Ok(()) => Ok(self.default_dir.clone()),
            Err(e) => {
                warn!(path = %self.default_dir.display(), error = %e, "default data folder unusable");
                Err(LocationError::NoWritableLocation)
            }
        }
    }

    /// Seed every user file for `variant` in `folder`.
    pub fn ensure_user_files(&self, folder: &Path, variant: LocaleVariant) -> Result<(), LocationError> {
        for kind in UserDataKind::ALL {
            let path = folder.join(kind.file_name(variant));
            if ensure_file_exists(&path, kind.template(variant))? {
                debug!(path = %path.display(), "seeded user file");
            }
        }
        Ok(())
    }
}

/// Side-effect-free check used by folder pickers.
pub fn check_if_specified_folder_valid(path: &str) -> bool {
    is_valid_folder(&expand_tilde(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::Preferences;

    fn location_with(default: &Path, specified: Option<&str>) -> DataLocation {
        let prefs = PreferenceStore::in_memory(Preferences {
            user_data_folder_specified: specified.map(str::to_string),
            ..Preferences::default()
        });
        DataLocation::new(default.to_path_buf(), Arc::new(prefs))
    }

    #[test]
    fn specified_equal_to_default_skips_validation() {
        // default does not exist, so any validation would fail
        let default = PathBuf::from("/no/such/default");
        let res = resolve_path(Some("/no/such/default/"), &default, false);
        assert_eq!(res.path, default);
        assert_eq!(res.rejected, None);

        let loc = location_with(&default, Some("/no/such/default//"));
        assert_eq!(loc.data_folder(false), default);
        assert!(loc.prefs().specified_folder().is_some());
    }

    #[test]
    fn invalid_specified_falls_back_and_clears_pref() {
        let dir = tempfile::tempdir().unwrap();
        let loc = location_with(dir.path(), Some("/no/such/dir"));
        assert_eq!(loc.data_folder(false), dir.path());
        assert_eq!(loc.prefs().specified_folder(), None);
    }

    #[test]
    fn valid_specified_is_used() {
        let default = tempfile::tempdir().unwrap();
        let chosen = tempfile::tempdir().unwrap();
        let loc = location_with(default.path(), chosen.path().to_str());
        assert_eq!(loc.data_folder(false), chosen.path());
        assert_eq!(loc.data_folder(true), default.path());
    }

    #[test]
    fn file_path_is_not_a_valid_folder() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "").unwrap();
        assert!(!check_if_specified_folder_valid(file.to_str().unwrap()));
        assert!(check_if_specified_folder_valid(dir.path().to_str().unwrap()));
    }

    #[test]
    fn leftover_marker_does_not_decide_validity() {
        let dir = tempfile::tempdir().unwrap();
        for seq in 0..WRITE_CHECK_ATTEMPTS {
            let stale = format!("{WRITE_CHECK_NAME}-{}-{seq}", std::process::id());
            fs::write(dir.path().join(stale), "").unwrap();
        }
        assert!(is_valid_folder(dir.path()));
        assert!(!is_valid_folder(&dir.path().join("missing")));

        let left: usize = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(left, WRITE_CHECK_ATTEMPTS as usize);
    }

    #[test]
    fn file_on_default_path_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join("LmEngine");
        fs::write(&default, "squatter").unwrap();

        ensure_directory(&default, &default).unwrap();
        assert!(default.is_dir());
        let moved: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("LmEngine-"))
            .collect();
        assert_eq!(moved.len(), 1);
    }

    #[test]
    fn file_on_other_path_is_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("chosen");
        fs::write(&other, "keep").unwrap();

        let err = ensure_directory(&other, &dir.path().join("LmEngine")).unwrap_err();
        assert!(matches!(err, LocationError::NotADirectory(_)));
        assert_eq!(fs::read_to_string(&other).unwrap(), "keep");
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_directory(&nested, dir.path()).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn ensure_file_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("userdata-cht.txt");
        assert!(ensure_file_exists(&path, "# template\n").unwrap());
        fs::write(&path, "你好 ni3-hao3\n").unwrap();
        assert!(!ensure_file_exists(&path, "# template\n").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "你好 ni3-hao3\n");
    }

    #[test]
    fn user_files_seeded_for_variant() {
        let dir = tempfile::tempdir().unwrap();
        let loc = location_with(dir.path(), None);
        let folder = loc.ensure_user_data_folder().unwrap();
        loc.ensure_user_files(&folder, LocaleVariant::Simplified).unwrap();
        for kind in UserDataKind::ALL {
            assert!(folder.join(kind.file_name(LocaleVariant::Simplified)).exists());
        }
        let assoc = fs::read_to_string(folder.join("associatedPhrases-chs.txt")).unwrap();
        assert!(assoc.contains("们"));
    }

    #[test]
    fn unusable_specified_folder_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join("default");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let loc = location_with(&default, Some(blocker.to_str().unwrap()));

        assert_eq!(loc.ensure_user_data_folder().unwrap(), default);
        assert!(default.is_dir());
        assert_eq!(loc.prefs().specified_folder(), None);
    }

    #[test]
    fn override_file_lives_beside_default_folder() {
        let path = override_data_path(Path::new("/data/LmEngine"), LocaleVariant::Traditional);
        assert_eq!(path, PathBuf::from("/data/lm_override-model-data-cht.dat"));
    }

    #[test]
    fn file_names_follow_variant_tag() {
        assert_eq!(
            UserDataKind::Filter.file_name(LocaleVariant::Simplified),
            "exclude-phrases-chs.txt"
        );
        assert_eq!(
            UserDataKind::Scpc.file_name(LocaleVariant::Traditional),
            "data-plain-bpmf-cht.txt"
        );
    }
}
