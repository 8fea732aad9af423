use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::credential::{Credential, CredentialView};

/// Default retention for a task → credential binding.
pub const DEFAULT_TASK_MAPPING_TTL_DAYS: i64 = 7;

/// Upper bound on the binding TTL accepted from configuration (ten years).
pub const MAX_TASK_MAPPING_TTL_DAYS: i64 = 3650;

/// Status written alongside a fresh binding.
pub const TASK_STATUS_PENDING: &str = "pending";

/// Which credential and user started a long-running vendor task.
/// Unique per `(task_id, vendor)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TaskTokenMapping {
    pub task_id: String,
    pub vendor: String,
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl TaskTokenMapping {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TaskStatus {
    pub task_id: String,
    pub vendor: String,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// A validated binding returned to a caller polling its own task.
#[derive(Debug, Clone)]
pub struct TaskBinding {
    pub token_id: Uuid,
    pub credential: Credential,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskBindingView {
    pub token_id: Uuid,
    pub credential: CredentialView,
}

impl TaskBinding {
    pub fn view(&self) -> TaskBindingView {
        TaskBindingView {
            token_id: self.token_id,
            credential: self.credential.view(),
        }
    }
}
