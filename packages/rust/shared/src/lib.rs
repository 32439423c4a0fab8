//! Shared types, error model, and configuration for Harvestline.
//!
//! This crate is the foundation depended on by all other Harvestline crates.
//! It provides:
//! - [`HarvestError`], the unified error type
//! - Domain types ([`CollectionTarget`], [`CollectionStatus`], [`TargetCriteria`], [`TargetView`])
//! - Configuration ([`AppConfig`], [`PlanConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    Accounting, AppConfig, BatchConfig, MAX_BATCH_SIZE, MIN_BATCH_SIZE, PlanConfig, StatusConfig,
    StorageConfig, TransitionMode, config_dir, config_file_path, expand_home, init_config,
    load_config, load_config_from, load_plan, validate_config,
};
pub use error::{HarvestError, Result};
pub use types::{
    CollectionRun, CollectionStatus, CollectionTarget, DistinctBy, LanguageTargets, LookupEntry,
    LookupKind, NewTarget, TargetCriteria, TargetId, TargetView,
};
