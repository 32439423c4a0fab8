//! Core domain types for Harvestline collection targets.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Surrogate identifier of a collection target row.
pub type TargetId = i64;

/// `type name → language code → target name → target id`.
pub type TargetView = BTreeMap<String, LanguageTargets>;

/// `language code → target name → target id`, the slice handed to a harvester.
pub type LanguageTargets = BTreeMap<String, BTreeMap<String, TargetId>>;

// ---------------------------------------------------------------------------
// LookupKind
// ---------------------------------------------------------------------------

/// The three name ↔ id lookup tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    Collector,
    Type,
    Status,
}

impl LookupKind {
    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            Self::Collector => "collector_names",
            Self::Type => "collection_types",
            Self::Status => "collection_statuses",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Collector => "collector",
            Self::Type => "collection type",
            Self::Status => "collection status",
        })
    }
}

/// One row of a lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CollectionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a target's collection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    NotCollected,
    InProgress,
    Collected,
    Failed,
    NeedsRetry,
    Skipped,
}

impl CollectionStatus {
    /// The fixed core vocabulary, in seeding order.
    pub const ALL: [CollectionStatus; 6] = [
        Self::NotCollected,
        Self::InProgress,
        Self::Collected,
        Self::Failed,
        Self::NeedsRetry,
        Self::Skipped,
    ];

    /// Statuses a worker may claim a target from.
    pub const CLAIMABLE: [CollectionStatus; 3] =
        [Self::NotCollected, Self::NeedsRetry, Self::Failed];

    /// Name stored in `collection_statuses`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotCollected => "not_collected",
            Self::InProgress => "in_progress",
            Self::Collected => "collected",
            Self::Failed => "failed",
            Self::NeedsRetry => "needs_retry",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_claimable(self) -> bool {
        Self::CLAIMABLE.contains(&self)
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionStatus {
    type Err = HarvestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| HarvestError::not_found(LookupKind::Status, s))
    }
}

// ---------------------------------------------------------------------------
// CollectionTarget
// ---------------------------------------------------------------------------

/// One unit of harvesting work, unique per (collector, type, language, name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTarget {
    pub id: TargetId,
    pub collector_id: i64,
    pub type_id: i64,
    /// Free-form, not validated against a fixed list.
    pub language_code: String,
    pub name: String,
    pub status_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A target to be registered, expressed with already-resolved lookup ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTarget {
    pub collector_id: i64,
    pub type_id: i64,
    pub language_code: String,
    pub name: String,
    pub status_id: i64,
}

// ---------------------------------------------------------------------------
// TargetCriteria
// ---------------------------------------------------------------------------

/// Column a distinct query keeps one representative row for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctBy {
    Type,
    Language,
}

/// Parameters of the single target query. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetCriteria {
    pub collector_id: Option<i64>,
    pub type_id: Option<i64>,
    pub language_code: Option<String>,
    pub status_id: Option<i64>,
    /// Keep only the earliest-created row per group.
    pub distinct_by: Option<DistinctBy>,
}

impl TargetCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collector(mut self, id: i64) -> Self {
        self.collector_id = Some(id);
        self
    }

    pub fn collection_type(mut self, id: i64) -> Self {
        self.type_id = Some(id);
        self
    }

    pub fn language(mut self, code: impl Into<String>) -> Self {
        self.language_code = Some(code.into());
        self
    }

    pub fn status(mut self, id: i64) -> Self {
        self.status_id = Some(id);
        self
    }

    pub fn distinct(mut self, by: DistinctBy) -> Self {
        self.distinct_by = Some(by);
        self
    }
}

// ---------------------------------------------------------------------------
// CollectionRun
// ---------------------------------------------------------------------------

/// Bookkeeping row for one orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRun {
    /// UUID v7 (time-sortable).
    pub id: String,
    pub collector_name: String,
    pub status_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_roundtrip() {
        for status in CollectionStatus::ALL {
            let parsed: CollectionStatus = status.as_str().parse().expect("parse status");
            assert_eq!(parsed, status);
        }
        assert_eq!(
            " Needs_Retry ".parse::<CollectionStatus>().unwrap(),
            CollectionStatus::NeedsRetry
        );
    }

    #[test]
    fn unknown_status_is_not_found() {
        let err = "debug_failed".parse::<CollectionStatus>().unwrap_err();
        assert!(matches!(
            err,
            HarvestError::NotFound {
                kind: LookupKind::Status,
                ..
            }
        ));
    }

    #[test]
    fn claimable_statuses() {
        assert!(CollectionStatus::NotCollected.is_claimable());
        assert!(CollectionStatus::NeedsRetry.is_claimable());
        assert!(!CollectionStatus::InProgress.is_claimable());
        assert!(!CollectionStatus::Collected.is_claimable());
    }

    #[test]
    fn criteria_builder() {
        let criteria = TargetCriteria::new()
            .collector(1)
            .status(2)
            .language("en")
            .distinct(DistinctBy::Language);
        assert_eq!(criteria.collector_id, Some(1));
        assert_eq!(criteria.status_id, Some(2));
        assert_eq!(criteria.type_id, None);
        assert_eq!(criteria.language_code.as_deref(), Some("en"));
        assert_eq!(criteria.distinct_by, Some(DistinctBy::Language));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&CollectionStatus::NeedsRetry).unwrap();
        assert_eq!(json, "\"needs_retry\"");
    }
}
