//! Target status state machine.
//!
//! Status writes go through [`StatusService`]. The default
//! [`TransitionPolicy::Permissive`] accepts any transition on an existing
//! target; [`TransitionPolicy::Validated`] checks an explicit table first.

use harvestline_shared::{CollectionStatus, LookupKind, Result, TargetId, TransitionMode};
use harvestline_storage::Storage;
use tracing::{debug, warn};

use crate::fail_soft;
use crate::resolver::LookupResolver;

/// Which status transitions [`StatusService::set_status`] accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    #[default]
    Permissive,
    Validated,
}

impl From<TransitionMode> for TransitionPolicy {
    fn from(mode: TransitionMode) -> Self {
        match mode {
            TransitionMode::Permissive => Self::Permissive,
            TransitionMode::Validated => Self::Validated,
        }
    }
}

impl TransitionPolicy {
    /// Whether moving from `from` to `to` is accepted.
    pub fn allows(self, from: CollectionStatus, to: CollectionStatus) -> bool {
        match self {
            Self::Permissive => true,
            Self::Validated => from == to || allowed_targets(from).contains(&to),
        }
    }
}

fn allowed_targets(from: CollectionStatus) -> &'static [CollectionStatus] {
    use CollectionStatus::*;
    match from {
        NotCollected => &[InProgress, Collected, Failed, Skipped],
        InProgress => &[Collected, Failed, NeedsRetry, Skipped, NotCollected],
        Collected => &[NeedsRetry, NotCollected],
        Failed => &[InProgress, NeedsRetry, NotCollected, Skipped, Collected],
        NeedsRetry => &[InProgress, Collected, Failed, Skipped, NotCollected],
        Skipped => &[NotCollected, NeedsRetry],
    }
}

/// Status mutations for collection targets.
pub struct StatusService<'a> {
    storage: &'a Storage,
    resolver: LookupResolver<'a>,
    policy: TransitionPolicy,
}

impl<'a> StatusService<'a> {
    pub fn new(storage: &'a Storage, policy: TransitionPolicy) -> Self {
        Self {
            storage,
            resolver: LookupResolver::new(storage),
            policy,
        }
    }

    /// Set a target's status.
    ///
    /// Returns `false` when the target does not exist, the policy rejects the
    /// transition, or the store fails.
    pub async fn set_status(&self, target_id: TargetId, status: CollectionStatus) -> Result<bool> {
        let outcome = self.try_set_status(target_id, status).await;
        fail_soft("set_status", outcome)
    }

    async fn try_set_status(&self, target_id: TargetId, status: CollectionStatus) -> Result<bool> {
        let status_id = self.resolver.status_id(status).await?;

        if self.policy == TransitionPolicy::Validated {
            let Some(target) = self.storage.get_target(target_id).await? else {
                return Ok(false);
            };
            if let Some(current) = self.status_of(target.status_id).await? {
                if !self.policy.allows(current, status) {
                    warn!(target_id, from = %current, to = %status, "rejected status transition");
                    return Ok(false);
                }
            }
        }

        let updated = self.storage.update_target_status(target_id, status_id).await?;
        if updated {
            debug!(target_id, %status, "status updated");
        } else {
            debug!(target_id, "status update matched no target");
        }
        Ok(updated)
    }

    /// Map a status row id back to a core status. `None` for statuses added
    /// administratively outside the core vocabulary.
    async fn status_of(&self, status_id: i64) -> Result<Option<CollectionStatus>> {
        let entries = self.storage.list_lookup(LookupKind::Status).await?;
        Ok(entries
            .into_iter()
            .find(|entry| entry.id == status_id)
            .and_then(|entry| entry.name.parse().ok()))
    }

    /// Move a target to IN_PROGRESS only if it is currently claimable.
    ///
    /// Returns `false` when another worker got there first.
    pub async fn claim(&self, target_id: TargetId) -> Result<bool> {
        let outcome = self.try_claim(target_id).await;
        fail_soft("claim", outcome)
    }

    async fn try_claim(&self, target_id: TargetId) -> Result<bool> {
        let in_progress = self.resolver.status_id(CollectionStatus::InProgress).await?;
        let mut expected = Vec::new();
        for status in CollectionStatus::ALL.into_iter().filter(|s| s.is_claimable()) {
            expected.push(self.resolver.status_id(status).await?);
        }

        let claimed = self
            .storage
            .update_target_status_if(target_id, in_progress, &expected)
            .await?;
        if !claimed {
            debug!(target_id, "target already claimed or missing");
        }
        Ok(claimed)
    }

    pub async fn mark_in_progress(&self, target_id: TargetId) -> Result<bool> {
        self.set_status(target_id, CollectionStatus::InProgress).await
    }

    pub async fn mark_collected(&self, target_id: TargetId) -> Result<bool> {
        self.set_status(target_id, CollectionStatus::Collected).await
    }

    pub async fn mark_failed(&self, target_id: TargetId) -> Result<bool> {
        self.set_status(target_id, CollectionStatus::Failed).await
    }

    pub async fn mark_needs_retry(&self, target_id: TargetId) -> Result<bool> {
        self.set_status(target_id, CollectionStatus::NeedsRetry).await
    }

    pub async fn mark_skipped(&self, target_id: TargetId) -> Result<bool> {
        self.set_status(target_id, CollectionStatus::Skipped).await
    }
}
