//! [`RecordWriter`] backed by the `harvested_records` table.

use harvestline_shared::{Result, TargetId};
use harvestline_storage::Storage;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::batch::RecordWriter;
use crate::status::{StatusService, TransitionPolicy};

/// Stores payloads and settles the target's status after each group.
///
/// A group with at least one stored payload marks its target COLLECTED,
/// otherwise FAILED.
pub struct StorageRecordWriter<'a> {
    storage: &'a Storage,
    status: StatusService<'a>,
}

impl<'a> StorageRecordWriter<'a> {
    pub fn new(storage: &'a Storage, policy: TransitionPolicy) -> Self {
        Self {
            storage,
            status: StatusService::new(storage, policy),
        }
    }

    async fn save_one(&self, payload: &Value, target_id: TargetId, language_code: &str) -> Result<i64> {
        let json = serde_json::to_string(payload)?;
        let hash = content_hash(&json);
        self.storage
            .insert_harvested_record(target_id, language_code, &json, &hash)
            .await
    }
}

impl RecordWriter for StorageRecordWriter<'_> {
    async fn write_group(
        &self,
        payloads: &[Value],
        target_id: TargetId,
        language_code: &str,
    ) -> Result<usize> {
        let mut saved = 0usize;
        for payload in payloads {
            match self.save_one(payload, target_id, language_code).await {
                Ok(record_id) => {
                    debug!(record_id, target_id, language_code, "stored record");
                    saved += 1;
                }
                Err(e) => warn!(target_id, language_code, error = %e, "failed to store record"),
            }
        }

        let marked = if saved > 0 {
            self.status.mark_collected(target_id).await?
        } else {
            self.status.mark_failed(target_id).await?
        };
        if !marked {
            warn!(target_id, "could not update target status after write");
        }
        Ok(saved)
    }
}

/// Hex SHA-256 of the serialized payload.
fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use harvestline_shared::LookupKind;
    use serde_json::json;

    use super::*;
    use crate::test_support::{seed_scenario, test_storage};

    async fn status_of(storage: &Storage, target_id: TargetId) -> String {
        let target = storage.get_target(target_id).await.unwrap().unwrap();
        storage
            .list_lookup(LookupKind::Status)
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.id == target.status_id)
            .unwrap()
            .name
    }

    #[test]
    fn hash_is_stable_hex() {
        let a = content_hash(r#"{"title":"Dog"}"#);
        assert_eq!(a.len(), 64);
        assert_eq!(a, content_hash(r#"{"title":"Dog"}"#));
        assert_ne!(a, content_hash(r#"{"title":"Cat"}"#));
    }

    #[tokio::test]
    async fn group_saves_records_and_marks_collected() {
        let storage = test_storage().await;
        let ids = seed_scenario(&storage).await;
        let writer = StorageRecordWriter::new(&storage, TransitionPolicy::Permissive);

        let saved = writer
            .write_group(&[json!({"title": "Dog"}), json!({"title": "Dog 2"})], ids.dog, "en")
            .await
            .unwrap();
        assert_eq!(saved, 2);
        assert_eq!(storage.count_records_for_target(ids.dog).await.unwrap(), 2);
        assert_eq!(status_of(&storage, ids.dog).await, "collected");
    }

    #[tokio::test]
    async fn failed_inserts_mark_failed() {
        let storage = test_storage().await;
        seed_scenario(&storage).await;
        let writer = StorageRecordWriter::new(&storage, TransitionPolicy::Permissive);

        // Unknown target: every insert violates the foreign key.
        let saved = writer
            .write_group(&[json!({"title": "Ghost"})], 9_999, "en")
            .await
            .unwrap();
        assert_eq!(saved, 0);
    }

    #[tokio::test]
    async fn empty_group_marks_failed() {
        let storage = test_storage().await;
        let ids = seed_scenario(&storage).await;
        let writer = StorageRecordWriter::new(&storage, TransitionPolicy::Permissive);

        assert_eq!(writer.write_group(&[], ids.cat, "en").await.unwrap(), 0);
        assert_eq!(status_of(&storage, ids.cat).await, "failed");
    }
}
