//! Durable access grants for user-chosen folders outside the default data
//! location.
//!
//! Sandboxed hosts capture an opaque token when the user picks a folder and
//! must replay it at every start before touching that folder. The platform
//! part (creating, resolving and activating tokens) sits behind
//! [`GrantResolver`]; [`PersistentGrants`] owns the token map on disk.
//! Unsandboxed hosts use [`PassThroughGrants`].

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::fsutil::atomic_write;

const MAGIC: &[u8; 4] = b"LMGR";
const VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt grant store: {0}")]
    Corrupt(String),

    #[error("{0} is permanently inaccessible")]
    Inaccessible(PathBuf),
}

impl GrantError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GrantError::Io(e) => ErrorKind::of_io(e),
            GrantError::Corrupt(_) => ErrorKind::ResourceCorrupt,
            GrantError::Inaccessible(_) => ErrorKind::PermissionDenied,
        }
    }
}

/// Counts from one `restore` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Resolved but flagged stale; kept on disk and skipped.
    pub stale: usize,
    /// Permanently inaccessible; dropped from the store.
    pub removed: usize,
}

pub trait AccessGrantStore: Send + Sync {
    fn grant(&self, path: &Path) -> Result<(), GrantError>;
    fn restore(&self) -> RestoreReport;
    /// Returns whether a grant for `path` existed.
    fn revoke(&self, path: &Path) -> Result<bool, GrantError>;
}

/// For hosts without sandboxed storage.
pub struct PassThroughGrants;

impl AccessGrantStore for PassThroughGrants {
    fn grant(&self, _path: &Path) -> Result<(), GrantError> {
        Ok(())
    }

    fn restore(&self) -> RestoreReport {
        RestoreReport::default()
    }

    fn revoke(&self, _path: &Path) -> Result<bool, GrantError> {
        Ok(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGrant {
    pub path: PathBuf,
    pub stale: bool,
}

/// Platform token operations.
pub trait GrantResolver: Send + Sync {
    fn create_token(&self, path: &Path) -> Result<Vec<u8>, GrantError>;
    /// `Err(Inaccessible)` means the grant can never be used again.
    fn resolve(&self, token: &[u8]) -> Result<ResolvedGrant, GrantError>;
    /// Activate extended access before first use. Returns false on refusal.
    fn start_access(&self, grant: &ResolvedGrant) -> bool;
    fn stop_access(&self, grant: &ResolvedGrant);
}

/// Token = path plus the folder's file identity at grant time. A folder
/// replaced by another at the same path resolves as stale.
pub struct PathTokenResolver;

#[derive(Serialize, Deserialize)]
struct PathToken {
    path: PathBuf,
    identity: u64,
}

fn identity_of(path: &Path) -> io::Result<u64> {
    let meta = fs::metadata(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Ok(meta.ino())
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        Ok(0)
    }
}

impl GrantResolver for PathTokenResolver {
    fn create_token(&self, path: &Path) -> Result<Vec<u8>, GrantError> {
        let token = PathToken {
            path: path.to_path_buf(),
            identity: identity_of(path)?,
        };
        bincode::serialize(&token).map_err(|e| GrantError::Corrupt(e.to_string()))
    }

    fn resolve(&self, token: &[u8]) -> Result<ResolvedGrant, GrantError> {
        let token: PathToken =
            bincode::deserialize(token).map_err(|e| GrantError::Corrupt(e.to_string()))?;
        match identity_of(&token.path) {
            Ok(identity) => Ok(ResolvedGrant {
                stale: identity != token.identity,
                path: token.path,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(GrantError::Inaccessible(token.path))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn start_access(&self, grant: &ResolvedGrant) -> bool {
        grant.path.exists()
    }

    fn stop_access(&self, _grant: &ResolvedGrant) {}
}

#[derive(Default, Serialize, Deserialize)]
struct GrantMap {
    tokens: BTreeMap<String, Vec<u8>>,
}

/// Token map persisted in the process's private support folder.
pub struct PersistentGrants<R: GrantResolver> {
    store_path: PathBuf,
    resolver: R,
    /// Handles kept active for the process lifetime.
    active: Mutex<Vec<ResolvedGrant>>,
}

impl<R: GrantResolver> PersistentGrants<R> {
    pub fn new(store_path: PathBuf, resolver: R) -> Self {
        Self {
            store_path,
            resolver,
            active: Mutex::new(Vec::new()),
        }
    }

    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .map(|g| g.path.clone())
            .collect()
    }

    /// Paths with a stored grant.
    pub fn granted_paths(&self) -> Result<Vec<PathBuf>, GrantError> {
        Ok(self.read_map()?.tokens.keys().map(PathBuf::from).collect())
    }

    fn read_map(&self) -> Result<GrantMap, GrantError> {
        let bytes = match fs::read(&self.store_path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(GrantMap::default()),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() < 5 || &bytes[0..4] != MAGIC {
            return Err(GrantError::Corrupt("bad magic".to_string()));
        }
        if bytes[4] != VERSION {
            return Err(GrantError::Corrupt(format!("unsupported version {}", bytes[4])));
        }
        bincode::deserialize(&bytes[5..]).map_err(|e| GrantError::Corrupt(e.to_string()))
    }

    fn write_map(&self, map: &GrantMap) -> Result<(), GrantError> {
        let body = bincode::serialize(map).map_err(|e| GrantError::Corrupt(e.to_string()))?;
        let mut buf = Vec::with_capacity(5 + body.len());
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&body);
        atomic_write(&self.store_path, &buf)?;
        Ok(())
    }

    /// Read the map, starting over when it is unreadable.
    fn read_map_or_empty(&self) -> GrantMap {
        match self.read_map() {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.store_path.display(), error = %e, "grant store unreadable, starting empty");
                GrantMap::default()
            }
        }
    }
}

fn key_for(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

impl<R: GrantResolver> AccessGrantStore for PersistentGrants<R> {
    fn grant(&self, path: &Path) -> Result<(), GrantError> {
        let token = self.resolver.create_token(path)?;
        let mut map = self.read_map_or_empty();
        let key = key_for(path);
        map.tokens.insert(key.clone(), token);
        self.write_map(&map)?;
        info!(path = %key, "access grant stored");
        Ok(())
    }

    fn restore(&self) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut map = self.read_map_or_empty();
        let mut dead = Vec::new();
        let mut active = self.active.lock().unwrap();

        for (key, token) in &map.tokens {
            match self.resolver.resolve(token) {
                Ok(grant) if grant.stale => {
                    warn!(path = %key, "access grant is stale, skipping");
                    report.stale += 1;
                }
                Ok(grant) => {
                    if active.iter().any(|g| g.path == grant.path) {
                        report.restored += 1;
                    } else if self.resolver.start_access(&grant) {
                        debug!(path = %key, "access grant restored");
                        active.push(grant);
                        report.restored += 1;
                    } else {
                        warn!(path = %key, "access refused for restored grant");
                    }
                }
                Err(GrantError::Inaccessible(_)) => {
                    info!(path = %key, "dropping grant for inaccessible location");
                    dead.push(key.clone());
                }
                Err(e) => {
                    warn!(path = %key, error = %e, "access grant unresolvable, skipping");
                }
            }
        }
        drop(active);

        if !dead.is_empty() {
            for key in &dead {
                map.tokens.remove(key);
            }
            report.removed = dead.len();
            if let Err(e) = self.write_map(&map) {
                warn!(error = %e, "failed to prune grant store");
            }
        }
        report
    }

    fn revoke(&self, path: &Path) -> Result<bool, GrantError> {
        let key = key_for(path);
        let mut map = self.read_map_or_empty();
        let existed = map.tokens.remove(&key).is_some();
        if existed {
            self.write_map(&map)?;
        }
        let mut active = self.active.lock().unwrap();
        active.retain(|g| {
            let keep = key_for(&g.path) != key;
            if !keep {
                self.resolver.stop_access(g);
            }
            keep
        });
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Token is the path text; a `stale:` prefix marks it stale.
    struct FakeResolver;

    impl GrantResolver for FakeResolver {
        fn create_token(&self, path: &Path) -> Result<Vec<u8>, GrantError> {
            Ok(path.to_string_lossy().into_owned().into_bytes())
        }

        fn resolve(&self, token: &[u8]) -> Result<ResolvedGrant, GrantError> {
            let text = String::from_utf8_lossy(token);
            if let Some(rest) = text.strip_prefix("stale:") {
                return Ok(ResolvedGrant {
                    path: PathBuf::from(rest),
                    stale: true,
                });
            }
            let path = PathBuf::from(text.as_ref());
            if !path.exists() {
                return Err(GrantError::Inaccessible(path));
            }
            Ok(ResolvedGrant { path, stale: false })
        }

        fn start_access(&self, _grant: &ResolvedGrant) -> bool {
            true
        }

        fn stop_access(&self, _grant: &ResolvedGrant) {}
    }

    #[test]
    fn granted_folder_restores_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let chosen = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("grants.bin");

        let grants = PersistentGrants::new(store_path.clone(), FakeResolver);
        grants.grant(chosen.path()).unwrap();

        let restarted = PersistentGrants::new(store_path, FakeResolver);
        let report = restarted.restore();
        assert_eq!(report.restored, 1);
        assert_eq!(restarted.active_paths().len(), 1);

        // repeated restore does not duplicate handles
        restarted.restore();
        assert_eq!(restarted.active_paths().len(), 1);
    }

    #[test]
    fn stale_entry_skipped_without_aborting_others() {
        let dir = tempfile::tempdir().unwrap();
        let good = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("grants.bin");
        let grants = PersistentGrants::new(store_path.clone(), FakeResolver);
        grants.grant(good.path()).unwrap();

        let mut map = grants.read_map().unwrap();
        map.tokens.insert("/aaa".to_string(), b"stale:/aaa".to_vec());
        grants.write_map(&map).unwrap();

        let report = grants.restore();
        assert_eq!(report, RestoreReport { restored: 1, stale: 1, removed: 0 });
        assert_eq!(grants.granted_paths().unwrap().len(), 2);
    }

    #[test]
    fn inaccessible_entry_removed() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        fs::create_dir(&gone).unwrap();
        let grants = PersistentGrants::new(dir.path().join("grants.bin"), FakeResolver);
        grants.grant(&gone).unwrap();
        fs::remove_dir(&gone).unwrap();

        let report = grants.restore();
        assert_eq!(report.removed, 1);
        assert!(grants.granted_paths().unwrap().is_empty());
    }

    #[test]
    fn revoke_forgets_grant() {
        let dir = tempfile::tempdir().unwrap();
        let chosen = tempfile::tempdir().unwrap();
        let grants = PersistentGrants::new(dir.path().join("grants.bin"), FakeResolver);
        grants.grant(chosen.path()).unwrap();
        grants.restore();

        assert!(grants.revoke(chosen.path()).unwrap());
        assert!(grants.active_paths().is_empty());
        assert!(!grants.revoke(chosen.path()).unwrap());
    }

    #[test]
    fn corrupt_store_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("grants.bin");
        fs::write(&store_path, b"junk").unwrap();
        let grants = PersistentGrants::new(store_path, FakeResolver);
        assert_eq!(grants.restore(), RestoreReport::default());
        assert!(matches!(grants.read_map(), Err(GrantError::Corrupt(_))));
    }

    #[test]
    fn path_token_round_trips_live_folder() {
        let chosen = tempfile::tempdir().unwrap();
        let token = PathTokenResolver.create_token(chosen.path()).unwrap();
        let grant = PathTokenResolver.resolve(&token).unwrap();
        assert_eq!(grant.path, chosen.path());
        assert!(!grant.stale);
    }

    #[test]
    fn path_token_for_deleted_folder_is_inaccessible() {
        let dir = tempfile::tempdir().unwrap();
        let chosen = dir.path().join("x");
        fs::create_dir(&chosen).unwrap();
        let token = PathTokenResolver.create_token(&chosen).unwrap();
        fs::remove_dir(&chosen).unwrap();
        assert!(matches!(
            PathTokenResolver.resolve(&token),
            Err(GrantError::Inaccessible(_))
        ));
    }

    #[test]
    fn pass_through_is_inert() {
        let grants = PassThroughGrants;
        grants.grant(Path::new("/anywhere")).unwrap();
        assert_eq!(grants.restore(), RestoreReport::default());
    }
}
