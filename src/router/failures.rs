use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::RoutingPolicy;
use crate::clock::Clock;
use crate::metrics;
use crate::models::breaker::FailureOutcome;
use crate::store::TokenStore;

/// Counts upstream failures against shared credentials and benches a
/// credential for the rest of the day once it crosses the threshold.
///
/// Owned credentials are never benched: a user keeps access to their own key
/// regardless of transient upstream trouble.
#[derive(Clone)]
pub struct FailureRegister {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    policy: RoutingPolicy,
}

impl FailureRegister {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, policy: RoutingPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Record one upstream failure. Never fails: storage errors are logged and
    /// reported as `FailureOutcome::Unrecorded` so the caller's original
    /// upstream error is what surfaces.
    pub async fn register_failure(&self, token_id: Uuid) -> FailureOutcome {
        let outcome = match self.try_register(token_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(token_id = %token_id, error = %e, "failed to record shared credential failure");
                FailureOutcome::Unrecorded
            }
        };
        metrics::record_failure(&outcome);
        outcome
    }

    async fn try_register(&self, token_id: Uuid) -> anyhow::Result<FailureOutcome> {
        let Some(cred) = self.store.get_credential(token_id).await? else {
            debug!(token_id = %token_id, "failure reported for unknown credential");
            return Ok(FailureOutcome::Ignored);
        };
        if !cred.shared {
            return Ok(FailureOutcome::Ignored);
        }

        let now = self.clock.now();
        let mut breaker = cred.breaker();
        let was_tripped = breaker.is_tripped(now);
        let outcome = breaker.record_failure(now, self.policy.failure_threshold, &self.policy.day);
        self.store.save_breaker(cred.id, &breaker).await?;

        match outcome {
            FailureOutcome::Tripped { count, until } if !was_tripped => {
                metrics::record_trip(&cred.vendor);
                warn!(
                    token_id = %cred.id,
                    vendor = %cred.vendor,
                    failures = count,
                    disabled_until = %until,
                    "shared credential breaker OPENED"
                );
            }
            _ => debug!(
                token_id = %cred.id,
                vendor = %cred.vendor,
                failures = breaker.failure_count,
                "shared credential failure recorded"
            ),
        }

        Ok(outcome)
    }
}
