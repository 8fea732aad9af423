//! TapCanvas token router - picks the upstream vendor credential for each
//! request, benches failing shared credentials for the day, and binds
//! long-running vendor tasks to the credential that started them.

pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod router;
pub mod store;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub router: router::TokenRouter,
    pub config: config::Config,
}
