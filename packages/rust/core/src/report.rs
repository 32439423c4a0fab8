//! Read-only aggregation over every collection target.

use std::collections::{BTreeMap, HashMap};

use harvestline_shared::{CollectionStatus, LookupKind, Result};
use harvestline_storage::Storage;
use serde::Serialize;

use crate::fail_soft;
use crate::query::QueryEngine;

/// Count of targets sharing one (type, language, status) combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    pub collection_type: String,
    pub language_code: String,
    pub status: String,
    pub count: u64,
}

/// Result of [`Reporter::status_summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    /// Sorted by type, language, status.
    pub by_type_language_status: Vec<GroupCount>,
    pub total_targets: u64,
    /// Targets per status name. The core statuses are always present.
    pub totals: BTreeMap<String, u64>,
    /// `collected / total * 100`, two decimals; `0` with no targets.
    pub collection_percentage: f64,
}

impl Default for StatusSummary {
    fn default() -> Self {
        Self {
            by_type_language_status: Vec::new(),
            total_targets: 0,
            totals: CollectionStatus::ALL
                .iter()
                .map(|s| (s.as_str().to_string(), 0))
                .collect(),
            collection_percentage: 0.0,
        }
    }
}

impl StatusSummary {
    /// Count for one status name, zero if absent.
    pub fn count(&self, status: CollectionStatus) -> u64 {
        self.totals.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Pending work for one collection type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeOverview {
    pub collection_type: String,
    pub pending: usize,
    pub languages: Vec<String>,
}

/// Pending work of a collector plus the global summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectorOverview {
    pub collector: String,
    pub status: String,
    pub types: Vec<TypeOverview>,
    pub summary: StatusSummary,
}

/// Round to two decimals (ties to even), `0` when `total` is `0`.
pub fn collection_percentage(collected: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (collected as f64 / total as f64 * 100.0 * 100.0).round_ties_even() / 100.0
}

/// Computes counts and percentages. Never writes.
pub struct Reporter<'a> {
    storage: &'a Storage,
}

impl<'a> Reporter<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Summary over every target. Storage failures yield the zero summary.
    pub async fn status_summary(&self) -> Result<StatusSummary> {
        let outcome = self.try_status_summary().await;
        fail_soft("status_summary", outcome)
    }

    async fn try_status_summary(&self) -> Result<StatusSummary> {
        let targets = self.storage.list_targets().await?;
        let types = self.id_names(LookupKind::Type).await?;
        let statuses = self.id_names(LookupKind::Status).await?;

        let mut groups: BTreeMap<(String, String, String), u64> = BTreeMap::new();
        let mut summary = StatusSummary::default();

        for target in &targets {
            let type_name = types
                .get(&target.type_id)
                .cloned()
                .unwrap_or_else(|| format!("type#{}", target.type_id));
            let status_name = statuses
                .get(&target.status_id)
                .cloned()
                .unwrap_or_else(|| format!("status#{}", target.status_id));

            *summary.totals.entry(status_name.clone()).or_default() += 1;
            *groups
                .entry((type_name, target.language_code.clone(), status_name))
                .or_default() += 1;
        }

        summary.total_targets = targets.len() as u64;
        summary.by_type_language_status = groups
            .into_iter()
            .map(|((collection_type, language_code, status), count)| GroupCount {
                collection_type,
                language_code,
                status,
                count,
            })
            .collect();
        summary.collection_percentage = collection_percentage(
            summary.count(CollectionStatus::Collected),
            summary.total_targets,
        );

        tracing::debug!(
            total = summary.total_targets,
            percentage = summary.collection_percentage,
            "computed status summary"
        );
        Ok(summary)
    }

    /// Pending types and languages for one collector, plus the global summary.
    ///
    /// Unknown collector or status names propagate as `NotFound`.
    pub async fn collector_overview(&self, collector: &str, status: &str) -> Result<CollectorOverview> {
        let engine = QueryEngine::new(self.storage);
        let view = engine
            .grouped_targets(collector, &crate::query::TargetFilter::Collector, status)
            .await?;

        let types = engine
            .distinct_types(collector, status)
            .await?
            .into_iter()
            .map(|collection_type| {
                let languages = view.get(&collection_type);
                TypeOverview {
                    pending: languages
                        .map(|l| l.values().map(BTreeMap::len).sum())
                        .unwrap_or(0),
                    languages: languages
                        .map(|l| l.keys().cloned().collect())
                        .unwrap_or_default(),
                    collection_type,
                }
            })
            .collect();

        Ok(CollectorOverview {
            collector: collector.to_string(),
            status: status.to_string(),
            types,
            summary: self.status_summary().await?,
        })
    }

    async fn id_names(&self, kind: LookupKind) -> Result<HashMap<i64, String>> {
        Ok(self
            .storage
            .list_lookup(kind)
            .await?
            .into_iter()
            .map(|entry| (entry.id, entry.name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{StatusService, TransitionPolicy};
    use crate::test_support::{
        add_target, break_target_table, seed_scenario, test_storage, test_storage_at,
    };

    #[test]
    fn percentage_rounding() {
        assert_eq!(collection_percentage(0, 0), 0.0);
        assert_eq!(collection_percentage(1, 3), 33.33);
        assert_eq!(collection_percentage(2, 3), 66.67);
        assert_eq!(collection_percentage(4, 4), 100.0);
    }

    #[test]
    fn percentage_ties_round_to_even() {
        assert_eq!(collection_percentage(1, 32), 3.12);
        assert_eq!(collection_percentage(5, 32), 15.62);
        assert_eq!(collection_percentage(3, 32), 9.38);
    }

    #[tokio::test]
    async fn empty_table_summary_is_zero() {
        let storage = test_storage().await;
        let summary = Reporter::new(&storage).status_summary().await.unwrap();

        assert_eq!(summary.total_targets, 0);
        assert_eq!(summary.collection_percentage, 0.0);
        assert!(summary.by_type_language_status.is_empty());
        assert_eq!(summary.totals.len(), CollectionStatus::ALL.len());
        assert!(summary.totals.values().all(|c| *c == 0));
    }

    #[tokio::test]
    async fn summary_after_marking_one_collected() {
        let storage = test_storage().await;
        let ids = seed_scenario(&storage).await;
        StatusService::new(&storage, TransitionPolicy::Permissive)
            .mark_collected(ids.dog)
            .await
            .unwrap();

        let summary = Reporter::new(&storage).status_summary().await.unwrap();
        assert_eq!(summary.total_targets, 3);
        assert_eq!(summary.count(CollectionStatus::Collected), 1);
        assert_eq!(summary.count(CollectionStatus::NotCollected), 2);
        assert_eq!(summary.count(CollectionStatus::Failed), 0);
        assert_eq!(summary.collection_percentage, 33.33);

        assert_eq!(
            summary.by_type_language_status,
            vec![
                GroupCount {
                    collection_type: "article".into(),
                    language_code: "en".into(),
                    status: "collected".into(),
                    count: 1,
                },
                GroupCount {
                    collection_type: "article".into(),
                    language_code: "en".into(),
                    status: "not_collected".into(),
                    count: 1,
                },
                GroupCount {
                    collection_type: "article".into(),
                    language_code: "fr".into(),
                    status: "not_collected".into(),
                    count: 1,
                },
            ]
        );
    }

    #[tokio::test]
    async fn summary_does_not_mutate_targets() {
        let storage = test_storage().await;
        seed_scenario(&storage).await;
        let before = storage.list_targets().await.unwrap();
        Reporter::new(&storage).status_summary().await.unwrap();
        assert_eq!(storage.list_targets().await.unwrap(), before);
    }

    #[tokio::test]
    async fn overview_lists_pending_types() {
        let storage = test_storage().await;
        seed_scenario(&storage).await;
        add_target(&storage, "wikipedia", "person", "de", "Goethe").await;

        let overview = Reporter::new(&storage)
            .collector_overview("wikipedia", "not_collected")
            .await
            .unwrap();
        assert_eq!(overview.types.len(), 2);
        assert_eq!(overview.types[0].collection_type, "article");
        assert_eq!(overview.types[0].pending, 3);
        assert_eq!(overview.types[0].languages, vec!["en", "fr"]);
        assert_eq!(overview.types[1].pending, 1);
        assert_eq!(overview.summary.total_targets, 4);
    }

    #[tokio::test]
    async fn store_failure_yields_zero_summary() {
        let (storage, path) = test_storage_at().await;
        seed_scenario(&storage).await;
        break_target_table(&path).await;
        let reporter = Reporter::new(&storage);

        let summary = reporter.status_summary().await.unwrap();
        assert_eq!(summary, StatusSummary::default());
        assert_eq!(summary.count(CollectionStatus::NotCollected), 0);

        let overview = reporter
            .collector_overview("wikipedia", "not_collected")
            .await
            .unwrap();
        assert!(overview.types.is_empty());
        assert_eq!(overview.summary, StatusSummary::default());
    }
}
