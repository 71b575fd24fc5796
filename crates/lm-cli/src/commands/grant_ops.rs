use std::path::Path;

use lm_core::access::{AccessGrantStore, PathTokenResolver, PersistentGrants, RestoreReport};

fn open(store: &Path) -> PersistentGrants<PathTokenResolver> {
    PersistentGrants::new(store.to_path_buf(), PathTokenResolver)
}

pub fn add(store: &Path, folder: &Path) {
    die!(
        open(store).grant(folder),
        "Error granting {}: {}",
        folder.display()
    );
    println!("Granted: {}", folder.display());
}

/// Restore every stored grant and report what happened to each.
pub fn restore(store: &Path) -> RestoreReport {
    let grants = open(store);
    let report = grants.restore();
    for path in grants.active_paths() {
        println!("active\t{}", path.display());
    }
    println!(
        "restored {}, stale {}, removed {}",
        report.restored, report.stale, report.removed
    );
    report
}

pub fn list(store: &Path) {
    let paths = die!(open(store).granted_paths(), "Error reading {}: {}", store.display());
    if paths.is_empty() {
        println!("(empty)");
    }
    for path in paths {
        println!("{}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanished_folder_is_dropped_on_restore() {
        let root = tempfile::tempdir().unwrap();
        let store = root.path().join("grants.bin");
        let kept = root.path().join("kept");
        let gone = root.path().join("gone");
        std::fs::create_dir(&kept).unwrap();
        std::fs::create_dir(&gone).unwrap();

        add(&store, &kept);
        add(&store, &gone);
        std::fs::remove_dir(&gone).unwrap();

        let report = restore(&store);
        assert_eq!(report.restored, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(open(&store).granted_paths().unwrap().len(), 1);
    }
}
