//! Seeding the target store from a plan file.

use harvestline_shared::{CollectionStatus, LookupKind, NewTarget, PlanConfig, Result};
use harvestline_storage::Storage;
use serde::Serialize;
use tracing::{info, instrument};

use crate::resolver::LookupResolver;

/// Outcome of [`seed_plan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub collector: String,
    pub types: usize,
    /// Targets listed in the plan.
    pub requested: usize,
    /// Targets that did not exist before.
    pub created: usize,
}

/// Register every target of `plan` as NOT_COLLECTED.
///
/// Lookup rows are created as needed; targets are inserted in a single
/// transaction and existing ones are left untouched.
#[instrument(skip_all, fields(collector = %plan.collector))]
pub async fn seed_plan(storage: &Storage, plan: &PlanConfig) -> Result<SeedReport> {
    let resolver = LookupResolver::new(storage);
    let collector_id = resolver
        .get_or_create(LookupKind::Collector, &plan.collector)
        .await?;
    let status_id = resolver.status_id(CollectionStatus::NotCollected).await?;

    let mut targets = Vec::with_capacity(plan.target_count());
    for (type_name, languages) in &plan.types {
        let type_id = resolver.get_or_create(LookupKind::Type, type_name).await?;
        for (language_code, names) in languages {
            targets.extend(names.iter().map(|name| NewTarget {
                collector_id,
                type_id,
                language_code: language_code.clone(),
                name: name.clone(),
                status_id,
            }));
        }
    }

    let created = storage.insert_targets(&targets).await?;
    info!(requested = targets.len(), created, "seeded plan");

    Ok(SeedReport {
        collector: plan.collector.clone(),
        types: plan.types.len(),
        requested: targets.len(),
        created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_storage;

    fn plan() -> PlanConfig {
        toml::from_str(
            r#"
collector = "wikipedia"

[types.article]
en = ["Dog", "Cat"]
fr = ["Chien"]

[types.person]
en = ["Ada Lovelace"]
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let storage = test_storage().await;

        let first = seed_plan(&storage, &plan()).await.unwrap();
        assert_eq!(first.types, 2);
        assert_eq!(first.requested, 4);
        assert_eq!(first.created, 4);

        let second = seed_plan(&storage, &plan()).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(storage.list_targets().await.unwrap().len(), 4);
        assert_eq!(storage.list_lookup(LookupKind::Type).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn seeded_targets_start_not_collected() {
        let storage = test_storage().await;
        seed_plan(&storage, &plan()).await.unwrap();

        let not_collected = storage
            .find_lookup(LookupKind::Status, "not_collected")
            .await
            .unwrap()
            .unwrap()
            .id;
        assert!(
            storage
                .list_targets()
                .await
                .unwrap()
                .iter()
                .all(|t| t.status_id == not_collected)
        );
    }
}
