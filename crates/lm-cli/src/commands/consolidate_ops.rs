use std::path::Path;

use lm_core::consolidator::{consolidate_file, Outcome};

/// Normalize a user phrase file in place.
///
/// `force` ignores the pragma shortcut and always re-runs the pass.
pub fn consolidate(path: &Path, force: bool) -> Outcome {
    let outcome = die!(
        consolidate_file(path, !force),
        "Error consolidating {}: {}",
        path.display()
    );
    let label = match outcome {
        Outcome::Skipped => "already consolidated (pragma present)",
        Outcome::Unchanged => "unchanged",
        Outcome::Rewritten => "rewritten",
    };
    println!("{}: {label}", path.display());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn force_bypasses_pragma() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("userdata-cht.txt");
        fs::write(&path, "你好  ni3-hao3\n你好 ni3-hao3\n").unwrap();

        assert_eq!(consolidate(&path, false), Outcome::Rewritten);
        assert_eq!(consolidate(&path, false), Outcome::Skipped);
        assert_eq!(consolidate(&path, true), Outcome::Unchanged);
    }
}
