use std::path::Path;

use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use lm_core::override_store::{now_epoch, LoadOutcome, OverrideStore};

const CONTEXT_COLUMN: usize = 24;

#[derive(Debug, Serialize)]
pub struct ContextReport {
    pub context: String,
    pub candidates: Vec<CandidateReport>,
}

#[derive(Debug, Serialize)]
pub struct CandidateReport {
    pub candidate: String,
    pub weight: f64,
    pub last_used: u64,
}

/// Open an override data file. A corrupt file is moved aside, as the engine
/// itself would do on startup.
pub fn open_store(path: &Path) -> OverrideStore {
    let store = OverrideStore::new(path.to_path_buf());
    match die!(store.load(), "Error reading {}: {}", path.display()) {
        LoadOutcome::Quarantined(moved) => {
            eprintln!("Warning: corrupt data moved to {}", moved.display());
        }
        LoadOutcome::Missing => eprintln!("Note: {} does not exist yet", path.display()),
        LoadOutcome::Loaded(_) => {}
    }
    store
}

pub fn collect(store: &OverrideStore, now: u64) -> Vec<ContextReport> {
    store
        .context_keys()
        .into_iter()
        .map(|context| {
            let candidates = store
                .score(&context, now)
                .into_iter()
                .map(|s| CandidateReport {
                    candidate: s.candidate,
                    weight: s.weight,
                    last_used: s.last_used,
                })
                .collect();
            ContextReport {
                context,
                candidates,
            }
        })
        .collect()
}

fn padded(text: &str, width: usize) -> String {
    let w = UnicodeWidthStr::width(text);
    if w < width {
        format!("{text}{}", " ".repeat(width - w))
    } else {
        text.to_string()
    }
}

pub fn show(path: &Path, json: bool) {
    let store = open_store(path);
    let reports = collect(&store, now_epoch());
    if json {
        let out = die!(serde_json::to_string_pretty(&reports), "Error: {}");
        println!("{out}");
        return;
    }
    if reports.is_empty() {
        println!("(empty)");
        return;
    }
    for report in &reports {
        let line: Vec<String> = report
            .candidates
            .iter()
            .map(|c| format!("{}={:.3}", c.candidate, c.weight))
            .collect();
        println!("{}{}", padded(&report.context, CONTEXT_COLUMN), line.join("  "));
    }
    println!("---");
    println!("{} contexts, {} pairs", reports.len(), store.len());
}

pub fn score(path: &Path, context: &str) {
    let store = open_store(path);
    let scored = store.score(context, now_epoch());
    if scored.is_empty() {
        println!("No overrides for {context}");
        return;
    }
    for s in scored {
        println!("{}\t{:.6}\t{}", s.candidate, s.weight, s.last_used);
    }
}

pub fn bleach(path: &Path, targets: &[String]) -> usize {
    let store = open_store(path);
    let targets: Vec<&str> = targets.iter().map(String::as_str).collect();
    let removed = store.bleach(&targets);
    println!("Removed {removed} pairs");
    removed
}

pub fn bleach_unigrams(path: &Path) -> usize {
    let store = open_store(path);
    let removed = store.bleach_all_unigrams();
    println!("Removed {removed} single-reading pairs");
    removed
}

pub fn clear(path: &Path) {
    let store = OverrideStore::new(path.to_path_buf());
    die!(store.clear_data(path), "Error clearing {}: {}", path.display());
    println!("Cleared {}", path.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(path: &Path) {
        let store = OverrideStore::new(path.to_path_buf());
        let now = now_epoch();
        store.record_override("ni3 hao3", "你好", now);
        store.record_override("ni3 hao3", "妳好", now - 3600);
        store.record_override("hao3", "好", now);
        store.save().unwrap();
    }

    #[test]
    fn collect_lists_every_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lm_override-model-data-cht.dat");
        seeded(&path);

        let reports = collect(&open_store(&path), now_epoch());
        let contexts: Vec<&str> = reports.iter().map(|r| r.context.as_str()).collect();
        assert_eq!(contexts, vec!["hao3", "ni3 hao3"]);
        assert_eq!(reports[1].candidates[0].candidate, "你好");
        let json = serde_json::to_value(&reports).unwrap();
        assert_eq!(json[0]["candidates"][0]["candidate"], "好");
    }

    #[test]
    fn bleach_commands_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lm_override-model-data-chs.dat");
        seeded(&path);

        assert_eq!(bleach(&path, &["妳好".to_string()]), 1);
        assert_eq!(bleach_unigrams(&path), 1);
        assert_eq!(open_store(&path).len(), 1);

        clear(&path);
        assert!(!path.exists());
    }

    #[test]
    fn padding_counts_wide_chars() {
        assert_eq!(padded("好", 4), "好  ");
        assert_eq!(padded("abcdef", 4), "abcdef");
    }
}
