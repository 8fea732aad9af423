pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::breaker::SharedBreaker;
use crate::models::credential::{Credential, NewCredential};
use crate::models::task::{TaskStatus, TaskTokenMapping};

/// Persistence the router needs from its backing store.
/// Implementations: PgStore (PostgreSQL), MemoryStore (tests, dev runs).
///
/// "First" lookups order by `created_at` ascending, so the oldest credential wins.
#[async_trait]
pub trait TokenStore: Send + Sync {
    // -- Credential administration --

    async fn insert_credential(
        &self,
        new: &NewCredential,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<Credential>;

    async fn get_credential(&self, id: Uuid) -> anyhow::Result<Option<Credential>>;

    async fn list_credentials(&self, owner_user_id: Uuid) -> anyhow::Result<Vec<Credential>>;

    /// Returns `false` when no credential has this id.
    async fn set_credential_enabled(&self, id: Uuid, enabled: bool) -> anyhow::Result<bool>;

    async fn delete_credential(&self, id: Uuid) -> anyhow::Result<bool>;

    // -- Resolution lookups --

    async fn find_owned_credential(
        &self,
        owner_user_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Credential>>;

    async fn find_shared_credential(&self, id: Uuid) -> anyhow::Result<Option<Credential>>;

    /// Oldest enabled credential owned by `owner_user_id` for `vendor`.
    async fn first_owned_enabled(
        &self,
        owner_user_id: Uuid,
        vendor: &str,
    ) -> anyhow::Result<Option<Credential>>;

    /// Oldest shared, enabled credential for `vendor` whose `disabled_until`
    /// is unset or strictly before `now`.
    async fn first_shared_available(
        &self,
        vendor: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Credential>>;

    /// Overwrite the breaker columns of one credential in a single write.
    async fn save_breaker(&self, id: Uuid, breaker: &SharedBreaker) -> anyhow::Result<()>;

    // -- Task bindings --

    /// Insert or replace the row keyed by `(task_id, vendor)`.
    async fn upsert_task_mapping(&self, mapping: &TaskTokenMapping) -> anyhow::Result<()>;

    async fn upsert_task_status(&self, status: &TaskStatus) -> anyhow::Result<()>;

    async fn get_task_mapping(
        &self,
        task_id: &str,
        vendor: &str,
    ) -> anyhow::Result<Option<TaskTokenMapping>>;

    async fn get_task_status(
        &self,
        task_id: &str,
        vendor: &str,
    ) -> anyhow::Result<Option<TaskStatus>>;

    /// Remove every mapping with `expires_at < now`. Returns rows removed.
    async fn delete_expired_mappings(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    /// Cheap round-trip used by the readiness probe.
    async fn ping(&self) -> anyhow::Result<()>;
}
