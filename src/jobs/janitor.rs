//! Background job: delete expired task bindings.
//!
//! `resolve_mapping` already sweeps lazily on every call. This job bounds
//! table growth when nobody polls for a while.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::router::TokenRouter;

/// Spawn the periodic sweep. Call this once at startup.
pub fn spawn(router: TokenRouter, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        loop {
            interval.tick().await;
            run_once(&router).await;
        }
    })
}

/// One sweep. Errors are logged; the next tick retries.
pub async fn run_once(router: &TokenRouter) -> u64 {
    match router.sweep_expired().await {
        Ok(rows) => {
            if rows > 0 {
                tracing::info!(rows = rows, "janitor removed expired task bindings");
            }
            rows
        }
        Err(e) => {
            tracing::error!("janitor sweep failed: {}", e);
            0
        }
    }
}
