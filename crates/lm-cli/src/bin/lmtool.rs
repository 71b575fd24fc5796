use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use lm_cli::commands::location_ops::ResolveOptions;
use lm_cli::commands::load_ops::LoadOptions;
use lm_cli::commands::{
    config_ops, consolidate_ops, grant_ops, load_ops, location_ops, override_ops,
};
use lm_core::variant::LocaleVariant;

#[derive(Parser)]
#[command(name = "lmtool", about = "Language model data maintenance tool")]
struct Cli {
    /// Write a JSON trace log into this directory (requires --features trace)
    #[arg(long, global = true)]
    trace_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize a user phrase file in place
    Consolidate {
        /// Phrase file (userdata-*.txt, exclude-phrases-*.txt, ...)
        file: PathBuf,
        /// Rewrite even when the file ends with the format pragma
        #[arg(long)]
        force: bool,
    },
    /// Show where user data and override files are resolved to
    Resolve {
        /// Preferences TOML file (in-memory defaults when omitted)
        #[arg(long)]
        prefs: Option<PathBuf>,
        /// Default data folder (platform support folder when omitted)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Remember this folder as the user's data folder
        #[arg(long)]
        set: Option<String>,
        /// Ignore the user's folder choice
        #[arg(long)]
        use_default: bool,
        /// Create the folder and seed missing user files
        #[arg(long)]
        ensure: bool,
    },
    /// Inspect or maintain an override data file
    Override {
        /// Override data file (lm_override-model-data-*.dat)
        file: PathBuf,
        #[command(subcommand)]
        action: OverrideAction,
    },
    /// Load factory dictionaries and print a summary
    Load {
        /// Folder holding data-*.json resources
        bundle_dir: PathBuf,
        /// chs or cht (both when omitted)
        #[arg(long)]
        variant: Option<LocaleVariant>,
        /// Default data folder (platform support folder when omitted)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Also seed and load user overlays
        #[arg(long)]
        user: bool,
        /// Reading keys to look up after loading
        #[arg(short, long)]
        query: Vec<String>,
        /// Seconds to wait for the load
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
    /// Export default settings as TOML
    SettingsExport,
    /// Validate a custom settings TOML file
    SettingsValidate {
        /// Path to the TOML file
        file: String,
    },
    /// Manage persisted folder access grants
    Grant {
        /// Grant store file
        store: PathBuf,
        #[command(subcommand)]
        action: GrantAction,
    },
}

#[derive(Subcommand)]
enum OverrideAction {
    /// List every context with its ranked candidates
    Show {
        /// Output as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Rank the candidates learned for one context
    Score {
        /// Context key, e.g. "ni3 hao3"
        context: String,
    },
    /// Forget the given candidates in every context
    Bleach {
        #[arg(required = true)]
        candidates: Vec<String>,
    },
    /// Forget overrides of single-reading contexts
    BleachUnigrams,
    /// Delete the file and all learned data
    Clear,
}

#[derive(Subcommand)]
enum GrantAction {
    /// Store a grant for a folder
    Add { folder: PathBuf },
    /// Re-acquire every stored grant
    Restore,
    /// List folders with a stored grant
    List,
}

fn main() {
    let cli = Cli::parse();
    if let Some(dir) = &cli.trace_dir {
        lm_engine::trace_init::init_tracing(dir);
    }

    match cli.command {
        Command::Consolidate { file, force } => {
            consolidate_ops::consolidate(&file, force);
        }
        Command::Resolve {
            prefs,
            data_dir,
            set,
            use_default,
            ensure,
        } => {
            location_ops::resolve(&ResolveOptions {
                prefs: prefs.as_deref(),
                data_dir: data_dir.as_deref(),
                set_folder: set.as_deref(),
                use_default,
                ensure,
            });
        }
        Command::Override { file, action } => run_override(&file, action),
        Command::Load {
            bundle_dir,
            variant,
            data_dir,
            user,
            query,
            timeout,
        } => {
            let report = load_ops::load(&LoadOptions {
                bundle_dir: &bundle_dir,
                data_dir: data_dir.as_deref(),
                variant,
                with_user_data: user,
                queries: &query,
                timeout: Duration::from_secs(timeout),
            });
            if !report.failures.is_empty() {
                std::process::exit(2);
            }
        }
        Command::SettingsExport => config_ops::settings_export(),
        Command::SettingsValidate { file } => config_ops::settings_validate(&file),
        Command::Grant { store, action } => match action {
            GrantAction::Add { folder } => grant_ops::add(&store, &folder),
            GrantAction::Restore => {
                grant_ops::restore(&store);
            }
            GrantAction::List => grant_ops::list(&store),
        },
    }
}

fn run_override(file: &Path, action: OverrideAction) {
    match action {
        OverrideAction::Show { json } => override_ops::show(file, json),
        OverrideAction::Score { context } => override_ops::score(file, &context),
        OverrideAction::Bleach { candidates } => {
            override_ops::bleach(file, &candidates);
        }
        OverrideAction::BleachUnigrams => {
            override_ops::bleach_unigrams(file);
        }
        OverrideAction::Clear => override_ops::clear(file),
    }
}
