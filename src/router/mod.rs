//! Credential routing: pick a credential, bench failing shared ones,
//! and remember which credential started a long-running task.

pub mod binder;
pub mod failures;
pub mod resolver;

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use crate::clock::{Clock, DayBoundary, SystemClock};
use crate::models::breaker::{FailureOutcome, DEFAULT_FAILURE_THRESHOLD};
use crate::models::credential::Credential;
use crate::models::task::{TaskBinding, DEFAULT_TASK_MAPPING_TTL_DAYS};
use crate::store::TokenStore;

pub use binder::TaskBinder;
pub use failures::FailureRegister;
pub use resolver::TokenResolver;

/// Tunables shared by the three components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Same-day failures that bench a shared credential.
    pub failure_threshold: u32,
    /// Lifetime of a task binding, refreshed on every write.
    pub task_mapping_ttl: Duration,
    /// Which offset defines "today" for the breaker.
    pub day: DayBoundary,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            task_mapping_ttl: Duration::days(DEFAULT_TASK_MAPPING_TTL_DAYS),
            day: DayBoundary::utc(),
        }
    }
}

/// Facade wiring the resolver, failure register and task binder to one
/// store and one clock.
#[derive(Clone)]
pub struct TokenRouter {
    resolver: TokenResolver,
    failures: FailureRegister,
    binder: TaskBinder,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
}

impl TokenRouter {
    pub fn new(store: Arc<dyn TokenStore>, policy: RoutingPolicy) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), policy)
    }

    pub fn with_clock(
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        policy: RoutingPolicy,
    ) -> Self {
        Self {
            resolver: TokenResolver::new(store.clone(), clock.clone()),
            failures: FailureRegister::new(store.clone(), clock.clone(), policy),
            binder: TaskBinder::new(store.clone(), clock.clone(), policy),
            store,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn resolve(
        &self,
        caller_id: Uuid,
        vendor: &str,
        explicit_token_id: Option<Uuid>,
    ) -> anyhow::Result<Option<Credential>> {
        self.resolver.resolve(caller_id, vendor, explicit_token_id).await
    }

    pub async fn register_failure(&self, token_id: Uuid) -> FailureOutcome {
        self.failures.register_failure(token_id).await
    }

    pub async fn record_mapping(&self, user_id: Uuid, token_id: Uuid, task_id: &str, vendor: &str) {
        self.binder
            .record_mapping(user_id, token_id, task_id, vendor)
            .await
    }

    pub async fn resolve_mapping(
        &self,
        user_id: Uuid,
        task_id: &str,
        vendor: &str,
    ) -> anyhow::Result<Option<TaskBinding>> {
        self.binder.resolve_mapping(user_id, task_id, vendor).await
    }

    pub async fn sweep_expired(&self) -> anyhow::Result<u64> {
        self.binder.sweep_expired().await
    }
}
