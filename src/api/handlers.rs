use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::breaker::FailureOutcome;
use crate::models::credential::{normalize_vendor, Credential, CredentialView, NewCredential};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub user_id: Uuid,
    pub vendor: String,
    pub token_id: Option<Uuid>,
}

/// What a route handler needs to call the vendor. Only served behind the admin key.
#[derive(Debug, Serialize)]
pub struct ResolvedCredential {
    pub token_id: Uuid,
    pub vendor: String,
    pub secret: String,
    pub shared: bool,
}

impl From<Credential> for ResolvedCredential {
    fn from(cred: Credential) -> Self {
        Self {
            token_id: cred.id,
            vendor: cred.vendor,
            secret: cred.secret,
            shared: cred.shared,
        }
    }
}

#[derive(Deserialize)]
pub struct BindTaskRequest {
    pub user_id: Uuid,
    pub token_id: Uuid,
    pub task_id: String,
    pub vendor: String,
}

#[derive(Deserialize)]
pub struct TaskLookupParams {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct ListCredentialsParams {
    pub owner_id: Uuid,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub id: Uuid,
    pub deleted: bool,
}

fn require_vendor(vendor: &str) -> Result<String, AppError> {
    let vendor = normalize_vendor(vendor);
    if vendor.is_empty() {
        return Err(AppError::BadRequest("vendor is required".into()));
    }
    Ok(vendor)
}

// ── Routing ──────────────────────────────────────────────────

/// POST /api/v1/resolve - pick the credential for a request
pub async fn resolve_credential(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<ResolvedCredential>, AppError> {
    let vendor = require_vendor(&payload.vendor)?;
    let cred = state
        .router
        .resolve(payload.user_id, &vendor, payload.token_id)
        .await?
        .ok_or(AppError::NoEligibleCredential)?;
    Ok(Json(cred.into()))
}

/// POST /api/v1/credentials/:id/failures - report an upstream failure
pub async fn report_failure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<FailureOutcome> {
    Json(state.router.register_failure(id).await)
}

/// POST /api/v1/tasks - remember which credential started a vendor task
pub async fn bind_task(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BindTaskRequest>,
) -> Result<StatusCode, AppError> {
    let vendor = require_vendor(&payload.vendor)?;
    if payload.task_id.trim().is_empty() {
        return Err(AppError::BadRequest("task_id is required".into()));
    }
    state
        .router
        .record_mapping(payload.user_id, payload.token_id, &payload.task_id, &vendor)
        .await;
    Ok(StatusCode::ACCEPTED)
}

/// GET /api/v1/tasks/:vendor/:task_id?user_id= - credential bound to a task
pub async fn lookup_task(
    State(state): State<Arc<AppState>>,
    Path((vendor, task_id)): Path<(String, String)>,
    Query(params): Query<TaskLookupParams>,
) -> Result<Json<ResolvedCredential>, AppError> {
    let vendor = require_vendor(&vendor)?;
    let binding = state
        .router
        .resolve_mapping(params.user_id, &task_id, &vendor)
        .await?
        .ok_or(AppError::TaskNotFound)?;
    Ok(Json(binding.credential.into()))
}

// ── Credential administration ────────────────────────────────

/// GET /api/v1/credentials?owner_id= - list a user's credentials (masked)
pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListCredentialsParams>,
) -> Result<Json<Vec<CredentialView>>, AppError> {
    let rows = state.router.store().list_credentials(params.owner_id).await?;
    Ok(Json(rows.iter().map(Credential::view).collect()))
}

/// POST /api/v1/credentials - store a new credential
pub async fn create_credential(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewCredential>,
) -> Result<(StatusCode, Json<CredentialView>), AppError> {
    require_vendor(&payload.vendor)?;
    if payload.secret.trim().is_empty() {
        return Err(AppError::BadRequest("secret is required".into()));
    }
    let now = state.router.clock().now();
    let cred = state.router.store().insert_credential(&payload, now).await?;
    tracing::info!(
        token_id = %cred.id,
        vendor = %cred.vendor,
        shared = cred.shared,
        "credential created"
    );
    Ok((StatusCode::CREATED, Json(cred.view())))
}

/// POST /api/v1/credentials/:id/enable
pub async fn enable_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    set_enabled(&state, id, true).await
}

/// POST /api/v1/credentials/:id/disable
pub async fn disable_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    set_enabled(&state, id, false).await
}

async fn set_enabled(state: &AppState, id: Uuid, enabled: bool) -> Result<StatusCode, AppError> {
    if state.router.store().set_credential_enabled(id, enabled).await? {
        tracing::info!(token_id = %id, enabled = enabled, "credential toggled");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::CredentialNotFound)
    }
}

/// DELETE /api/v1/credentials/:id
pub async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state.router.store().delete_credential(id).await?;
    if !deleted {
        return Err(AppError::CredentialNotFound);
    }
    Ok(Json(DeleteResponse { id, deleted }))
}
