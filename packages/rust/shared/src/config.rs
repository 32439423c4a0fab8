//! Application configuration for Harvestline.
//!
//! User config lives at `~/.harvestline/harvestline.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "harvestline.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".harvestline";

/// Inclusive bounds accepted for `[batch] batch_size`.
pub const MIN_BATCH_SIZE: u32 = 1;
pub const MAX_BATCH_SIZE: u32 = 1000;

// ---------------------------------------------------------------------------
// Config structs (matching harvestline.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Write-back buffering.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Status transition handling.
    #[serde(default)]
    pub status: StatusConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. A leading `~/` expands to the home dir.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "~/.harvestline/harvestline.db".into()
}

/// How the batch writer counts a flushed group as saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accounting {
    /// Any successful writer call counts the whole group.
    #[default]
    Optimistic,
    /// Add the count the writer reports.
    Exact,
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of buffered items that triggers a flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// When false, harvested payloads are kept in memory and written to
    /// `local_output_dir` at the end of the run instead.
    #[serde(default = "default_true")]
    pub save_to_database: bool,

    /// Saved-count accounting mode.
    #[serde(default)]
    pub accounting: Accounting,

    /// Directory for test-mode output files.
    #[serde(default = "default_local_output_dir")]
    pub local_output_dir: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            save_to_database: true,
            accounting: Accounting::default(),
            local_output_dir: default_local_output_dir(),
        }
    }
}

fn default_batch_size() -> u32 {
    50
}
fn default_true() -> bool {
    true
}
fn default_local_output_dir() -> String {
    "var/harvest".into()
}

/// Which status transitions are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionMode {
    /// Any status may be set on an existing target.
    #[default]
    Permissive,
    /// Only transitions in the explicit table are accepted.
    Validated,
}

/// `[status]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub transitions: TransitionMode,
}

// ---------------------------------------------------------------------------
// Plan file
// ---------------------------------------------------------------------------

/// Intended targets for one collector, used to seed the target store.
///
/// ```toml
/// collector = "wikipedia"
///
/// [types.article]
/// en = ["Dog", "Cat"]
/// fr = ["Chien"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Collector name the targets belong to.
    pub collector: String,

    /// `type → language → names`.
    #[serde(default)]
    pub types: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PlanConfig {
    /// Total number of target names listed in the plan.
    pub fn target_count(&self) -> usize {
        self.types
            .values()
            .flat_map(|langs| langs.values())
            .map(Vec::len)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.harvestline/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.harvestline/harvestline.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        HarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values no component can run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let size = config.batch.batch_size;
    if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
        return Err(HarvestError::config(format!(
            "batch.batch_size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {size}"
        )));
    }
    if config.storage.database_path.trim().is_empty() {
        return Err(HarvestError::config("storage.database_path must not be empty"));
    }
    Ok(())
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Load and check a plan file.
pub fn load_plan(path: &Path) -> Result<PlanConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;
    let plan: PlanConfig = toml::from_str(&content).map_err(|e| {
        HarvestError::validation(format!("failed to parse plan {}: {e}", path.display()))
    })?;
    validate_plan(&plan)?;
    Ok(plan)
}

fn validate_plan(plan: &PlanConfig) -> Result<()> {
    if plan.collector.trim().is_empty() {
        return Err(HarvestError::validation("plan collector name is empty"));
    }
    for (type_name, languages) in &plan.types {
        if type_name.trim().is_empty() {
            return Err(HarvestError::validation("plan contains an empty type name"));
        }
        for (language, names) in languages {
            if language.trim().is_empty() {
                return Err(HarvestError::validation(format!(
                    "type '{type_name}' has an empty language code"
                )));
            }
            if names.iter().any(|n| n.trim().is_empty()) {
                return Err(HarvestError::validation(format!(
                    "type '{type_name}' language '{language}' has an empty target name"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("database_path"));
        assert!(toml_str.contains("batch_size = 50"));
        assert!(toml_str.contains("permissive"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[batch]
batch_size = 3
accounting = "exact"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.batch.batch_size, 3);
        assert_eq!(config.batch.accounting, Accounting::Exact);
        assert!(config.batch.save_to_database);
        assert_eq!(config.status.transitions, TransitionMode::Permissive);
        assert_eq!(config.storage.database_path, "~/.harvestline/harvestline.db");
    }

    #[test]
    fn batch_size_bounds() {
        let mut config = AppConfig::default();
        config.batch.batch_size = 0;
        assert!(validate_config(&config).is_err());

        config.batch.batch_size = MAX_BATCH_SIZE + 1;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("batch_size"));

        config.batch.batch_size = MAX_BATCH_SIZE;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn expand_home_only_touches_tilde_prefix() {
        assert_eq!(expand_home("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
        assert_eq!(expand_home("rel/x.db"), PathBuf::from("rel/x.db"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x.db"), home.join("x.db"));
        }
    }

    #[test]
    fn plan_parses_and_counts() {
        let toml_str = r#"
collector = "wikipedia"

[types.article]
en = ["Dog", "Cat"]
fr = ["Chien"]

[types.person]
en = ["Ada Lovelace"]
"#;
        let plan: PlanConfig = toml::from_str(toml_str).expect("parse plan");
        validate_plan(&plan).expect("valid plan");
        assert_eq!(plan.collector, "wikipedia");
        assert_eq!(plan.types.len(), 2);
        assert_eq!(plan.target_count(), 4);
    }

    #[test]
    fn plan_rejects_empty_names() {
        let toml_str = r#"
collector = "wikipedia"

[types.article]
en = ["Dog", " "]
"#;
        let plan: PlanConfig = toml::from_str(toml_str).expect("parse plan");
        let err = validate_plan(&plan).unwrap_err();
        assert!(err.to_string().contains("empty target name"));
    }

    #[test]
    fn load_plan_from_file() {
        let path = std::env::temp_dir().join(format!("hl_plan_{}.toml", uuid::Uuid::now_v7()));
        std::fs::write(&path, "collector = \"news\"\n[types.headline]\nde = [\"Wahl\"]\n")
            .expect("write plan");
        let plan = load_plan(&path).expect("load plan");
        assert_eq!(plan.collector, "news");
        assert_eq!(plan.target_count(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
