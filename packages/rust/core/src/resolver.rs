//! Name ↔ id resolution for collectors, collection types and statuses.

use harvestline_shared::{CollectionStatus, HarvestError, LookupKind, Result};
use harvestline_storage::Storage;

/// Resolves lookup names against the three lookup tables.
///
/// Borrows an already-opened [`Storage`]; the caller owns its lifecycle.
pub struct LookupResolver<'a> {
    storage: &'a Storage,
}

/// Ids produced by [`LookupResolver::resolve_ids`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedIds {
    pub collector_id: Option<i64>,
    pub type_id: Option<i64>,
    pub status_id: Option<i64>,
}

impl<'a> LookupResolver<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Look up an existing name. Fails with [`HarvestError::NotFound`] when absent.
    pub async fn resolve(&self, kind: LookupKind, name: &str) -> Result<i64> {
        self.storage
            .find_lookup(kind, name)
            .await?
            .map(|entry| entry.id)
            .ok_or_else(|| HarvestError::not_found(kind, name))
    }

    /// Resolve a core status to its row id.
    pub async fn status_id(&self, status: CollectionStatus) -> Result<i64> {
        self.resolve(LookupKind::Status, status.as_str()).await
    }

    /// Return the id for `name`, creating the row if needed.
    pub async fn get_or_create(&self, kind: LookupKind, name: &str) -> Result<i64> {
        let (id, created) = self.storage.insert_lookup(kind, name).await?;
        if created {
            tracing::info!(%kind, name, id, "created lookup entry");
        }
        Ok(id)
    }

    /// Resolve every supplied name, or fail on the first unknown one.
    pub async fn resolve_ids(
        &self,
        collector: Option<&str>,
        collection_type: Option<&str>,
        status: Option<&str>,
    ) -> Result<ResolvedIds> {
        let mut ids = ResolvedIds::default();
        if let Some(name) = collector {
            ids.collector_id = Some(self.resolve(LookupKind::Collector, name).await?);
        }
        if let Some(name) = collection_type {
            ids.type_id = Some(self.resolve(LookupKind::Type, name).await?);
        }
        if let Some(name) = status {
            ids.status_id = Some(self.resolve(LookupKind::Status, name).await?);
        }
        Ok(ids)
    }
}
