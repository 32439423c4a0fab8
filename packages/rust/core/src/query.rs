//! Query/grouping engine: filter shapes → `type → language → name → id`.

use std::collections::{BTreeSet, HashMap};

use harvestline_shared::{
    CollectionTarget, DistinctBy, HarvestError, LookupKind, Result, TargetCriteria, TargetId,
    TargetView,
};
use harvestline_storage::Storage;
use tracing::{debug, instrument, warn};

use crate::fail_soft;
use crate::resolver::LookupResolver;

// ---------------------------------------------------------------------------
// Filter shapes
// ---------------------------------------------------------------------------

/// The supported ways to narrow a collector's targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetFilter {
    /// Every target of the collector.
    Collector,
    /// Each (type, language) pair of the cross product.
    TypesAndLanguages {
        types: Vec<String>,
        languages: Vec<String>,
    },
    /// Each listed type, any language.
    Types(Vec<String>),
    /// Every type, only the listed languages.
    Languages(Vec<String>),
}

impl TargetFilter {
    /// Build a filter from optional parts. Empty lists count as absent.
    ///
    /// Identifier-based filtering has no defined semantics and is rejected
    /// with [`HarvestError::UnsupportedFilter`].
    pub fn try_from_parts(
        types: Option<Vec<String>>,
        languages: Option<Vec<String>>,
        target_ids: Option<Vec<TargetId>>,
    ) -> Result<Self> {
        if target_ids.is_some_and(|ids| !ids.is_empty()) {
            return Err(HarvestError::UnsupportedFilter(
                "filtering by target id is not supported".into(),
            ));
        }

        let types = types.filter(|t| !t.is_empty());
        let languages = languages.filter(|l| !l.is_empty());
        Ok(match (types, languages) {
            (None, None) => Self::Collector,
            (Some(types), Some(languages)) => Self::TypesAndLanguages { types, languages },
            (Some(types), None) => Self::Types(types),
            (None, Some(languages)) => Self::Languages(languages),
        })
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Reshape targets into `type → language → name → id`.
///
/// A later target with the same (type, language, name) key overwrites an
/// earlier one. Targets whose type id is unknown are skipped.
pub fn group_targets<'t>(
    targets: impl IntoIterator<Item = &'t CollectionTarget>,
    type_names: &HashMap<i64, String>,
) -> TargetView {
    let mut view = TargetView::new();
    for target in targets {
        let Some(type_name) = type_names.get(&target.type_id) else {
            warn!(target_id = target.id, type_id = target.type_id, "target has unknown type, skipping");
            continue;
        };
        view.entry(type_name.clone())
            .or_default()
            .entry(target.language_code.clone())
            .or_default()
            .insert(target.name.clone(), target.id);
    }
    view
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Resolves filters against the target store.
pub struct QueryEngine<'a> {
    storage: &'a Storage,
    resolver: LookupResolver<'a>,
}

impl<'a> QueryEngine<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            resolver: LookupResolver::new(storage),
        }
    }

    /// Grouped view of a collector's targets at `status`.
    ///
    /// Unknown names fail with [`HarvestError::NotFound`]; storage failures
    /// yield an empty view.
    #[instrument(skip_all, fields(collector = %collector, status = %status))]
    pub async fn grouped_targets(
        &self,
        collector: &str,
        filter: &TargetFilter,
        status: &str,
    ) -> Result<TargetView> {
        let outcome = self.try_grouped_targets(collector, filter, status).await;
        fail_soft("grouped_targets", outcome)
    }

    /// Like [`Self::grouped_targets`], building the filter from optional parts.
    ///
    /// Unsupported combinations log a warning and yield an empty view.
    pub async fn grouped_targets_from_parts(
        &self,
        collector: &str,
        types: Option<Vec<String>>,
        languages: Option<Vec<String>>,
        target_ids: Option<Vec<TargetId>>,
        status: &str,
    ) -> Result<TargetView> {
        match TargetFilter::try_from_parts(types, languages, target_ids) {
            Ok(filter) => self.grouped_targets(collector, &filter, status).await,
            Err(HarvestError::UnsupportedFilter(reason)) => {
                warn!(collector, %reason, "unsupported target filter, returning empty view");
                Ok(TargetView::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn try_grouped_targets(
        &self,
        collector: &str,
        filter: &TargetFilter,
        status: &str,
    ) -> Result<TargetView> {
        let ids = self
            .resolver
            .resolve_ids(Some(collector), None, Some(status))
            .await?;
        let base = TargetCriteria {
            collector_id: ids.collector_id,
            status_id: ids.status_id,
            ..TargetCriteria::default()
        };

        // Resolve every requested type before touching the target table.
        let type_ids = match filter {
            TargetFilter::Types(types) | TargetFilter::TypesAndLanguages { types, .. } => {
                let mut resolved = Vec::with_capacity(types.len());
                for name in types {
                    resolved.push(self.resolver.resolve(LookupKind::Type, name).await?);
                }
                resolved
            }
            TargetFilter::Collector | TargetFilter::Languages(_) => Vec::new(),
        };

        let mut targets = Vec::new();
        match filter {
            TargetFilter::Collector => {
                targets = self.storage.query_targets(&base).await?;
            }
            TargetFilter::TypesAndLanguages { languages, .. } => {
                for type_id in &type_ids {
                    for language in languages {
                        let criteria = base.clone().collection_type(*type_id).language(language);
                        targets.extend(self.storage.query_targets(&criteria).await?);
                    }
                }
            }
            TargetFilter::Types(_) => {
                for type_id in &type_ids {
                    let criteria = base.clone().collection_type(*type_id);
                    targets.extend(self.storage.query_targets(&criteria).await?);
                }
            }
            TargetFilter::Languages(languages) => {
                let wanted: BTreeSet<&str> = languages.iter().map(String::as_str).collect();
                targets = self
                    .storage
                    .query_targets(&base)
                    .await?
                    .into_iter()
                    .filter(|t| wanted.contains(t.language_code.as_str()))
                    .collect();
            }
        }

        let type_names = self.type_names().await?;
        let view = group_targets(&targets, &type_names);
        debug!(matched = targets.len(), types = view.len(), "grouped targets");
        Ok(view)
    }

    /// Type names of a collector's targets at `status`.
    ///
    /// With `distinct`, one entry per type (earliest-created representative);
    /// otherwise one entry per target.
    pub async fn list_types(&self, collector: &str, status: &str, distinct: bool) -> Result<Vec<String>> {
        let outcome = self.try_list_types(collector, status, distinct).await;
        fail_soft("list_types", outcome)
    }

    async fn try_list_types(&self, collector: &str, status: &str, distinct: bool) -> Result<Vec<String>> {
        let targets = self
            .targets_for(collector, status, distinct.then_some(DistinctBy::Type))
            .await?;
        let type_names = self.type_names().await?;
        Ok(targets
            .iter()
            .filter_map(|t| type_names.get(&t.type_id).cloned())
            .collect())
    }

    /// Language codes of a collector's targets at `status`.
    ///
    /// With `distinct`, one entry per language; otherwise one per target.
    pub async fn list_languages(
        &self,
        collector: &str,
        status: &str,
        distinct: bool,
    ) -> Result<Vec<String>> {
        let outcome = self
            .targets_for(collector, status, distinct.then_some(DistinctBy::Language))
            .await
            .map(|targets| targets.into_iter().map(|t| t.language_code).collect());
        fail_soft("list_languages", outcome)
    }

    /// Distinct type names with pending work, in type-id order.
    pub async fn distinct_types(&self, collector: &str, status: &str) -> Result<Vec<String>> {
        self.list_types(collector, status, true).await
    }

    /// Distinct language codes, in code order.
    pub async fn distinct_languages(&self, collector: &str, status: &str) -> Result<Vec<String>> {
        self.list_languages(collector, status, true).await
    }

    async fn targets_for(
        &self,
        collector: &str,
        status: &str,
        distinct_by: Option<DistinctBy>,
    ) -> Result<Vec<CollectionTarget>> {
        let ids = self
            .resolver
            .resolve_ids(Some(collector), None, Some(status))
            .await?;
        let criteria = TargetCriteria {
            collector_id: ids.collector_id,
            status_id: ids.status_id,
            distinct_by,
            ..TargetCriteria::default()
        };
        self.storage.query_targets(&criteria).await
    }

    async fn type_names(&self) -> Result<HashMap<i64, String>> {
        Ok(self
            .storage
            .list_lookup(LookupKind::Type)
            .await?
            .into_iter()
            .map(|entry| (entry.id, entry.name))
            .collect())
    }
}
