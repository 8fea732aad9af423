use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::RoutingPolicy;
use crate::clock::Clock;
use crate::metrics;
use crate::models::credential::normalize_vendor;
use crate::models::task::{TaskBinding, TaskStatus, TaskTokenMapping, TASK_STATUS_PENDING};
use crate::store::TokenStore;

/// Remembers which credential and user started a long-running vendor task so
/// later polls reuse the same account.
#[derive(Clone)]
pub struct TaskBinder {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    policy: RoutingPolicy,
}

impl TaskBinder {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, policy: RoutingPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Upsert the binding for `(task_id, vendor)` with a fresh TTL and mark
    /// the task pending. Best effort: storage errors are logged, not returned.
    pub async fn record_mapping(&self, user_id: Uuid, token_id: Uuid, task_id: &str, vendor: &str) {
        let vendor = normalize_vendor(vendor);
        let now = self.clock.now();
        let Some(expires_at) = now.checked_add_signed(self.policy.task_mapping_ttl) else {
            warn!(
                task_id = task_id,
                vendor = %vendor,
                ttl = %self.policy.task_mapping_ttl,
                "task binding TTL overflows the calendar, binding not recorded"
            );
            return;
        };
        let mapping = TaskTokenMapping {
            task_id: task_id.to_string(),
            vendor: vendor.clone(),
            token_id,
            user_id,
            expires_at,
        };

        if let Err(e) = self.store.upsert_task_mapping(&mapping).await {
            warn!(task_id = task_id, vendor = %vendor, error = %e, "failed to record task binding");
            return;
        }

        let status = TaskStatus {
            task_id: task_id.to_string(),
            vendor: vendor.clone(),
            status: TASK_STATUS_PENDING.to_string(),
            updated_at: now,
        };
        if let Err(e) = self.store.upsert_task_status(&status).await {
            warn!(task_id = task_id, vendor = %vendor, error = %e, "failed to record task status");
        }

        debug!(
            task_id = task_id,
            vendor = %vendor,
            token_id = %token_id,
            expires_at = %mapping.expires_at,
            "task binding recorded"
        );
    }

    /// Look up the credential bound to a task on behalf of `user_id`.
    ///
    /// Returns `None` when the binding is missing or expired, belongs to
    /// another user, or its credential is no longer usable. Callers must not
    /// distinguish these cases in anything user-visible.
    pub async fn resolve_mapping(
        &self,
        user_id: Uuid,
        task_id: &str,
        vendor: &str,
    ) -> anyhow::Result<Option<TaskBinding>> {
        let vendor = normalize_vendor(vendor);
        self.sweep_expired().await?;

        let Some(mapping) = self.store.get_task_mapping(task_id, &vendor).await? else {
            return Ok(None);
        };

        if mapping.user_id != user_id {
            warn!(
                task_id = task_id,
                vendor = %vendor,
                caller_id = %user_id,
                "task binding requested by a different user"
            );
            return Ok(None);
        }

        let Some(cred) = self.store.get_credential(mapping.token_id).await? else {
            debug!(task_id = task_id, token_id = %mapping.token_id, "bound credential no longer exists");
            return Ok(None);
        };
        if !cred.enabled {
            debug!(task_id = task_id, token_id = %cred.id, "bound credential disabled");
            return Ok(None);
        }
        if cred.shared && cred.breaker().is_tripped(self.clock.now()) {
            debug!(task_id = task_id, token_id = %cred.id, "bound shared credential benched");
            return Ok(None);
        }

        Ok(Some(TaskBinding {
            token_id: mapping.token_id,
            credential: cred,
        }))
    }

    /// Delete every expired binding. Safe to run from many callers at once.
    pub async fn sweep_expired(&self) -> anyhow::Result<u64> {
        let removed = self.store.delete_expired_mappings(self.clock.now()).await?;
        if removed > 0 {
            metrics::record_swept(removed);
            debug!(rows = removed, "expired task bindings removed");
        }
        Ok(removed)
    }
}
