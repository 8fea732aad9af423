use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::TokenStore;
use crate::models::breaker::SharedBreaker;
use crate::models::credential::{normalize_vendor, Credential, NewCredential};
use crate::models::task::{TaskStatus, TaskTokenMapping};

type TaskKey = (String, String);

/// In-process store backed by `DashMap`s.
///
/// Cloning shares the underlying maps. `set_offline(true)` makes every call
/// fail, which is how tests simulate an unreachable database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    credentials: Arc<DashMap<Uuid, Credential>>,
    mappings: Arc<DashMap<TaskKey, TaskTokenMapping>>,
    statuses: Arc<DashMap<TaskKey, TaskStatus>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("memory store is offline");
        }
        Ok(())
    }

    /// Oldest credential matching `pred`; ties broken by id for determinism.
    fn first_where<F>(&self, pred: F) -> Option<Credential>
    where
        F: Fn(&Credential) -> bool,
    {
        self.credentials
            .iter()
            .filter(|entry| pred(entry.value()))
            .min_by_key(|entry| (entry.value().created_at, entry.value().id))
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_credential(
        &self,
        new: &NewCredential,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<Credential> {
        self.check()?;
        let cred = Credential {
            id: Uuid::new_v4(),
            owner_user_id: new.owner_user_id,
            vendor: normalize_vendor(&new.vendor),
            secret: new.secret.clone(),
            shared: new.shared,
            enabled: new.enabled,
            shared_failure_count: 0,
            shared_last_failure_at: None,
            shared_disabled_until: None,
            created_at,
        };
        self.credentials.insert(cred.id, cred.clone());
        Ok(cred)
    }

    async fn get_credential(&self, id: Uuid) -> anyhow::Result<Option<Credential>> {
        self.check()?;
        Ok(self.credentials.get(&id).map(|c| c.value().clone()))
    }

    async fn list_credentials(&self, owner_user_id: Uuid) -> anyhow::Result<Vec<Credential>> {
        self.check()?;
        let mut rows: Vec<Credential> = self
            .credentials
            .iter()
            .filter(|c| c.owner_user_id == owner_user_id)
            .map(|c| c.value().clone())
            .collect();
        rows.sort_by_key(|c| (c.created_at, c.id));
        Ok(rows)
    }

    async fn set_credential_enabled(&self, id: Uuid, enabled: bool) -> anyhow::Result<bool> {
        self.check()?;
        match self.credentials.get_mut(&id) {
            Some(mut cred) => {
                cred.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_credential(&self, id: Uuid) -> anyhow::Result<bool> {
        self.check()?;
        Ok(self.credentials.remove(&id).is_some())
    }

    async fn find_owned_credential(
        &self,
        owner_user_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Credential>> {
        self.check()?;
        Ok(self
            .credentials
            .get(&id)
            .filter(|c| c.owner_user_id == owner_user_id)
            .map(|c| c.value().clone()))
    }

    async fn find_shared_credential(&self, id: Uuid) -> anyhow::Result<Option<Credential>> {
        self.check()?;
        Ok(self
            .credentials
            .get(&id)
            .filter(|c| c.shared)
            .map(|c| c.value().clone()))
    }

    async fn first_owned_enabled(
        &self,
        owner_user_id: Uuid,
        vendor: &str,
    ) -> anyhow::Result<Option<Credential>> {
        self.check()?;
        Ok(self.first_where(|c| {
            c.owner_user_id == owner_user_id && c.vendor == vendor && c.enabled
        }))
    }

    async fn first_shared_available(
        &self,
        vendor: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Credential>> {
        self.check()?;
        Ok(self.first_where(|c| {
            c.vendor == vendor
                && c.shared
                && c.enabled
                && c.shared_disabled_until.map_or(true, |until| until < now)
        }))
    }

    async fn save_breaker(&self, id: Uuid, breaker: &SharedBreaker) -> anyhow::Result<()> {
        self.check()?;
        if let Some(mut cred) = self.credentials.get_mut(&id) {
            cred.set_breaker(*breaker);
        }
        Ok(())
    }

    async fn upsert_task_mapping(&self, mapping: &TaskTokenMapping) -> anyhow::Result<()> {
        self.check()?;
        self.mappings.insert(
            (mapping.task_id.clone(), mapping.vendor.clone()),
            mapping.clone(),
        );
        Ok(())
    }

    async fn upsert_task_status(&self, status: &TaskStatus) -> anyhow::Result<()> {
        self.check()?;
        self.statuses.insert(
            (status.task_id.clone(), status.vendor.clone()),
            status.clone(),
        );
        Ok(())
    }

    async fn get_task_mapping(
        &self,
        task_id: &str,
        vendor: &str,
    ) -> anyhow::Result<Option<TaskTokenMapping>> {
        self.check()?;
        let key = (task_id.to_string(), vendor.to_string());
        Ok(self.mappings.get(&key).map(|m| m.value().clone()))
    }

    async fn get_task_status(
        &self,
        task_id: &str,
        vendor: &str,
    ) -> anyhow::Result<Option<TaskStatus>> {
        self.check()?;
        let key = (task_id.to_string(), vendor.to_string());
        Ok(self.statuses.get(&key).map(|s| s.value().clone()))
    }

    async fn delete_expired_mappings(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        self.check()?;
        // Count inside retain: concurrent upserts make len() before/after unreliable.
        let mut removed = 0u64;
        self.mappings.retain(|_, m| {
            let keep = !m.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.check()
    }
}
