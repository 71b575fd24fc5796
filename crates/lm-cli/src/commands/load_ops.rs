use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use lm_core::location::{default_data_dir, APP_NAME};
use lm_core::model::FactorySet;
use lm_core::variant::LocaleVariant;
use lm_engine::coordinator::ModelCoordinator;
use lm_engine::loader::LoadNotification;

pub struct LoadOptions<'a> {
    pub bundle_dir: &'a Path,
    pub data_dir: Option<&'a Path>,
    /// Load one variant only; both when `None`.
    pub variant: Option<LocaleVariant>,
    /// Also seed and load the user overlays and override data.
    pub with_user_data: bool,
    pub queries: &'a [String],
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct LoadReport {
    pub units: usize,
    pub failures: Vec<String>,
    pub elapsed: Duration,
}

/// Load factory dictionaries the way the engine does at startup and print a
/// summary, plus candidates for each query.
pub fn load(opts: &LoadOptions) -> LoadReport {
    let default_dir: PathBuf = opts
        .data_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_data_dir(APP_NAME));
    let coord = ModelCoordinator::unsandboxed(opts.bundle_dir.to_path_buf(), default_dir);

    if opts.with_user_data {
        let folder = die!(coord.initialize_user_overlays(), "Error: {}");
        println!("user data: {}", folder.display());
    }

    let start = Instant::now();
    let ticket = match opts.variant {
        Some(v) => coord.load_variant(v, false),
        None => coord.load_all_dictionaries(false),
    };
    let report = match coord.wait_completion(ticket, opts.timeout) {
        Some(LoadNotification::Completed {
            units, failures, ..
        }) => LoadReport {
            units,
            failures: failures
                .into_iter()
                .map(|f| format!("{}: {}", f.label, f.reason))
                .collect(),
            elapsed: start.elapsed(),
        },
        _ => {
            eprintln!("Error: load did not finish within {:?}", opts.timeout);
            std::process::exit(1);
        }
    };

    let variants: Vec<LocaleVariant> = match opts.variant {
        Some(v) => vec![v],
        None => LocaleVariant::CONCRETE.to_vec(),
    };
    for &variant in &variants {
        let model = coord.get_model(variant);
        for set in FactorySet::ALL {
            let factory = model.factory(set);
            if factory.is_loaded() {
                let (keys, entries) = factory.stats();
                println!("{variant}/{:<8} {keys:>8} keys {entries:>9} entries", set.label());
            } else {
                println!("{variant}/{:<8} not loaded", set.label());
            }
        }
    }
    for failure in &report.failures {
        println!("failed: {failure}");
    }
    println!(
        "{} units in {:.1}ms",
        report.units,
        report.elapsed.as_secs_f64() * 1000.0
    );

    for reading in opts.queries {
        for &variant in &variants {
            let values: Vec<String> = coord
                .query(variant, reading)
                .into_iter()
                .map(|c| c.value)
                .collect();
            println!("{variant} {reading}: {}", values.join(" "));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn single_variant_load_reports_missing_sets() {
        let root = tempfile::tempdir().unwrap();
        let bundle = root.path().join("bundle");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("data-cht.json"), r#"{"hao3": [["好", -2.0]]}"#).unwrap();
        fs::write(bundle.join("data-symbols.json"), r#"{"_star": [["★", 0.0]]}"#).unwrap();

        let queries = vec!["hao3".to_string()];
        let support = root.path().join("support");
        let report = load(&LoadOptions {
            bundle_dir: &bundle,
            data_dir: Some(support.as_path()),
            variant: Some(LocaleVariant::Traditional),
            with_user_data: false,
            queries: &queries,
            timeout: Duration::from_secs(10),
        });
        assert_eq!(report.units, 4);
        let mut failed: Vec<&str> = report
            .failures
            .iter()
            .map(|f| f.split(':').next().unwrap())
            .collect();
        failed.sort();
        assert_eq!(failed, vec!["cht/cns", "cht/misc"]);
    }
}
