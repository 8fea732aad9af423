use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::metrics::{self, ResolutionSource};
use crate::models::credential::{normalize_vendor, Credential};
use crate::store::TokenStore;

/// Picks the credential that serves a request.
///
/// Order of preference:
/// 1. an explicitly requested id (caller-owned first, then shared pool);
/// 2. the caller's oldest enabled credential for the vendor;
/// 3. the oldest shared credential for the vendor that is not benched.
///
/// `Ok(None)` means nothing is eligible; storage errors are returned as `Err`.
#[derive(Clone)]
pub struct TokenResolver {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
}

impl TokenResolver {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn resolve(
        &self,
        caller_id: Uuid,
        vendor: &str,
        explicit_token_id: Option<Uuid>,
    ) -> anyhow::Result<Option<Credential>> {
        let vendor = normalize_vendor(vendor);
        let now = self.clock.now();

        let (resolved, source) = match explicit_token_id {
            Some(token_id) => (
                self.resolve_explicit(caller_id, token_id, now).await?,
                ResolutionSource::Explicit,
            ),
            None => self.resolve_for_vendor(caller_id, &vendor, now).await?,
        };

        let source = if resolved.is_some() {
            source
        } else {
            ResolutionSource::None
        };
        metrics::record_resolution(&vendor, source);

        match &resolved {
            Some(cred) => debug!(
                caller_id = %caller_id,
                vendor = %vendor,
                token_id = %cred.id,
                source = source.as_str(),
                "credential resolved"
            ),
            None => info!(
                caller_id = %caller_id,
                vendor = %vendor,
                explicit = explicit_token_id.is_some(),
                "no eligible credential"
            ),
        }

        Ok(resolved)
    }

    async fn resolve_explicit(
        &self,
        caller_id: Uuid,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Credential>> {
        // The caller's own credential is never subject to the shared breaker.
        if let Some(cred) = self.store.find_owned_credential(caller_id, token_id).await? {
            return Ok(cred.enabled.then_some(cred));
        }

        match self.store.find_shared_credential(token_id).await? {
            Some(cred) if cred.enabled => self.admit_shared(cred, now).await,
            _ => Ok(None),
        }
    }

    async fn resolve_for_vendor(
        &self,
        caller_id: Uuid,
        vendor: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(Option<Credential>, ResolutionSource)> {
        if let Some(cred) = self.store.first_owned_enabled(caller_id, vendor).await? {
            return Ok((Some(cred), ResolutionSource::Owned));
        }

        let shared = match self.store.first_shared_available(vendor, now).await? {
            Some(cred) => self.admit_shared(cred, now).await?,
            None => None,
        };
        Ok((shared, ResolutionSource::Shared))
    }

    /// Gate a shared credential on its breaker, closing it if the cool-down
    /// has run out.
    async fn admit_shared(
        &self,
        mut cred: Credential,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Credential>> {
        let mut breaker = cred.breaker();
        if breaker.is_tripped(now) {
            debug!(
                token_id = %cred.id,
                disabled_until = ?breaker.disabled_until,
                "shared credential benched"
            );
            return Ok(None);
        }

        if breaker.try_heal(now) {
            self.store.save_breaker(cred.id, &breaker).await?;
            cred.set_breaker(breaker);
            metrics::record_heal(&cred.vendor);
            info!(
                token_id = %cred.id,
                vendor = %cred.vendor,
                "shared credential breaker closed after cool-down"
            );
        }

        Ok(Some(cred))
    }
}
