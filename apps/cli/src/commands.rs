//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use harvestline_core::plan::seed_plan;
use harvestline_core::query::{QueryEngine, TargetFilter};
use harvestline_core::report::Reporter;
use harvestline_core::status::{StatusService, TransitionPolicy};
use harvestline_shared::{
    AppConfig, CollectionStatus, expand_home, init_config, load_config, load_config_from,
    load_plan,
};
use harvestline_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Harvestline: track what still needs harvesting.
#[derive(Parser)]
#[command(
    name = "harvestline",
    version,
    about = "Seed, inspect and manage harvesting targets and their collection status.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.harvestline/harvestline.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path, overriding `[storage] database_path`.
    #[arg(long, env = "HARVESTLINE_DB", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Register every target listed in a plan file.
    Seed {
        /// Plan file (TOML).
        #[arg(long)]
        plan: PathBuf,
    },

    /// Print the grouped `type → language → name → id` view as JSON.
    Targets {
        #[arg(long)]
        collector: String,

        /// Restrict to a collection type (repeatable).
        #[arg(long = "type")]
        types: Vec<String>,

        /// Restrict to a language code (repeatable).
        #[arg(long = "language")]
        languages: Vec<String>,

        #[arg(long, default_value = "not_collected")]
        status: String,
    },

    /// List collection types of a collector's targets.
    Types {
        #[arg(long)]
        collector: String,

        #[arg(long, default_value = "not_collected")]
        status: String,

        /// One entry per target instead of one per type.
        #[arg(long)]
        all: bool,
    },

    /// List language codes of a collector's targets.
    Languages {
        #[arg(long)]
        collector: String,

        #[arg(long, default_value = "not_collected")]
        status: String,

        /// One entry per target instead of one per language.
        #[arg(long)]
        all: bool,
    },

    /// Show collection progress.
    Status {
        /// Also list the collector's pending types.
        #[arg(long)]
        collector: Option<String>,

        #[arg(long, default_value = "not_collected")]
        pending_status: String,
    },

    /// Set a target's status.
    Mark {
        /// Target id.
        id: i64,

        /// New status name (e.g. collected, failed, needs_retry).
        status: String,
    },

    /// Move a claimable target to in_progress.
    Claim {
        /// Target id.
        id: i64,
    },

    /// List recent collection runs, newest first.
    Runs {
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Delete a target and its harvested records.
    Delete {
        /// Target id.
        id: i64,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "harvestline=info",
        1 => "harvestline=debug",
        _ => "harvestline=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref(), cli.db.as_deref())?;

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
        command => {
            let storage = open_storage(&config).await?;
            let policy = TransitionPolicy::from(config.status.transitions);
            match command {
                Command::Seed { plan } => cmd_seed(&storage, &plan).await,
                Command::Targets {
                    collector,
                    types,
                    languages,
                    status,
                } => cmd_targets(&storage, &collector, types, languages, &status).await,
                Command::Types {
                    collector,
                    status,
                    all,
                } => cmd_types(&storage, &collector, &status, all).await,
                Command::Languages {
                    collector,
                    status,
                    all,
                } => cmd_languages(&storage, &collector, &status, all).await,
                Command::Status {
                    collector,
                    pending_status,
                } => cmd_status(&storage, collector.as_deref(), &pending_status).await,
                Command::Mark { id, status } => cmd_mark(&storage, policy, id, &status).await,
                Command::Claim { id } => cmd_claim(&storage, policy, id).await,
                Command::Runs { limit } => cmd_runs(&storage, limit).await,
                Command::Delete { id } => cmd_delete(&storage, id).await,
                Command::Config { .. } => Ok(()),
            }
        }
    }
}

/// Load the config file and apply flag overrides.
fn resolve_config(config_path: Option<&Path>, db: Option<&Path>) -> Result<AppConfig> {
    let mut config = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(db) = db {
        config.storage.database_path = db.display().to_string();
    }
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = expand_home(&config.storage.database_path);
    info!(path = %path.display(), "opening database");
    Ok(Storage::open(&path).await?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_seed(storage: &Storage, plan_path: &Path) -> Result<()> {
    let plan = load_plan(plan_path)?;
    let report = seed_plan(storage, &plan).await?;

    println!(
        "Seeded collector '{}': {} targets across {} types ({} new)",
        report.collector, report.requested, report.types, report.created
    );
    Ok(())
}

async fn cmd_targets(
    storage: &Storage,
    collector: &str,
    types: Vec<String>,
    languages: Vec<String>,
    status: &str,
) -> Result<()> {
    let filter = TargetFilter::try_from_parts(Some(types), Some(languages), None)?;
    let view = QueryEngine::new(storage)
        .grouped_targets(collector, &filter, status)
        .await?;

    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn cmd_types(storage: &Storage, collector: &str, status: &str, all: bool) -> Result<()> {
    let types = QueryEngine::new(storage)
        .list_types(collector, status, !all)
        .await?;
    for name in types {
        println!("{name}");
    }
    Ok(())
}

async fn cmd_languages(storage: &Storage, collector: &str, status: &str, all: bool) -> Result<()> {
    let languages = QueryEngine::new(storage)
        .list_languages(collector, status, !all)
        .await?;
    for code in languages {
        println!("{code}");
    }
    Ok(())
}

async fn cmd_status(storage: &Storage, collector: Option<&str>, pending_status: &str) -> Result<()> {
    let reporter = Reporter::new(storage);

    let summary = match collector {
        Some(collector) => {
            let overview = reporter.collector_overview(collector, pending_status).await?;
            println!("Collector '{}' ({}):", overview.collector, overview.status);
            if overview.types.is_empty() {
                println!("\tNo pending targets");
            }
            for entry in &overview.types {
                println!(
                    "\t{}: {} targets in {} languages ({})",
                    entry.collection_type,
                    entry.pending,
                    entry.languages.len(),
                    entry.languages.join(", ")
                );
            }
            println!();
            overview.summary
        }
        None => reporter.status_summary().await?,
    };

    println!("Overall Summary:");
    println!("\tTotal targets: {}", summary.total_targets);
    println!(
        "\tCollection progress: {}/{} ({:.2}%)",
        summary.count(CollectionStatus::Collected),
        summary.total_targets,
        summary.collection_percentage
    );
    for (status, count) in &summary.totals {
        if *count > 0 && status != CollectionStatus::Collected.as_str() {
            println!("\t{status}: {count}");
        }
    }

    if !summary.by_type_language_status.is_empty() {
        println!();
        println!("By type / language / status:");
        for group in &summary.by_type_language_status {
            println!(
                "\t{} / {} / {}: {}",
                group.collection_type, group.language_code, group.status, group.count
            );
        }
    }
    Ok(())
}

async fn cmd_mark(storage: &Storage, policy: TransitionPolicy, id: i64, status: &str) -> Result<()> {
    let status: CollectionStatus = status.parse()?;
    let updated = StatusService::new(storage, policy)
        .set_status(id, status)
        .await?;

    if !updated {
        return Err(eyre!("target {id} was not updated (missing or transition rejected)"));
    }
    println!("Target {id} marked {status}");
    Ok(())
}

async fn cmd_claim(storage: &Storage, policy: TransitionPolicy, id: i64) -> Result<()> {
    if StatusService::new(storage, policy).claim(id).await? {
        println!("Claimed target {id}");
    } else {
        println!("Target {id} is missing or not claimable");
    }
    Ok(())
}

async fn cmd_runs(storage: &Storage, limit: u32) -> Result<()> {
    let runs = storage.list_collection_runs(limit).await?;
    if runs.is_empty() {
        println!("No collection runs recorded");
    }
    for run in runs {
        let state = match (&run.finished_at, &run.stats) {
            (None, _) => "running".to_string(),
            (Some(_), Some(stats)) if stats.get("error").is_some() => "aborted".to_string(),
            (Some(finished), _) => format!("finished {}", finished.to_rfc3339()),
        };
        println!(
            "{}  {} ({})  started {}  {}",
            run.id,
            run.collector_name,
            run.status_name,
            run.started_at.to_rfc3339(),
            state
        );
    }
    Ok(())
}

async fn cmd_delete(storage: &Storage, id: i64) -> Result<()> {
    if storage.delete_target(id).await? {
        info!(target_id = id, "deleted target");
        println!("Deleted target {id}");
    } else {
        println!("No target with id {id}");
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn targets_accepts_repeated_filters() {
        let cli = Cli::try_parse_from([
            "harvestline",
            "targets",
            "--collector",
            "wikipedia",
            "--type",
            "article",
            "--type",
            "person",
            "--language",
            "en",
        ])
        .expect("parse");

        match cli.command {
            Command::Targets {
                collector,
                types,
                languages,
                status,
            } => {
                assert_eq!(collector, "wikipedia");
                assert_eq!(types, vec!["article", "person"]);
                assert_eq!(languages, vec!["en"]);
                assert_eq!(status, "not_collected");
            }
            _ => panic!("expected targets command"),
        }
    }

    #[test]
    fn runs_limit_defaults_to_twenty() {
        let cli = Cli::try_parse_from(["harvestline", "runs"]).expect("parse");
        assert!(matches!(cli.command, Command::Runs { limit: 20 }));
    }

    #[test]
    fn db_flag_overrides_config_file() {
        let path = std::env::temp_dir().join(format!("hl_cli_{}.toml", std::process::id()));
        std::fs::write(&path, "[batch]\nbatch_size = 5\n").expect("write config");

        let config = resolve_config(Some(&path), Some(Path::new("/tmp/hl.db"))).expect("resolve");
        assert_eq!(config.batch.batch_size, 5);
        assert_eq!(config.storage.database_path, "/tmp/hl.db");
        let _ = std::fs::remove_file(&path);
    }
}
