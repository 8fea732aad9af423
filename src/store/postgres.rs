use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::TokenStore;
use crate::models::breaker::SharedBreaker;
use crate::models::credential::{normalize_vendor, Credential, NewCredential};
use crate::models::task::{TaskStatus, TaskTokenMapping};

const CREDENTIAL_COLUMNS: &str = "id, owner_user_id, vendor, secret, shared, enabled, \
     shared_failure_count, shared_last_failure_at, shared_disabled_until, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fetch_credential(
        &self,
        filter: &str,
        id: Uuid,
        owner: Option<Uuid>,
    ) -> anyhow::Result<Option<Credential>> {
        let sql = format!("SELECT {} FROM credentials WHERE {}", CREDENTIAL_COLUMNS, filter);
        let mut query = sqlx::query_as::<_, Credential>(&sql).bind(id);
        if let Some(owner) = owner {
            query = query.bind(owner);
        }
        Ok(query.fetch_optional(&self.pool).await?)
    }
}

#[async_trait]
impl TokenStore for PgStore {
    // -- Credential administration --

    async fn insert_credential(
        &self,
        new: &NewCredential,
        created_at: DateTime<Utc>,
    ) -> anyhow::Result<Credential> {
        let sql = format!(
            r#"INSERT INTO credentials (owner_user_id, vendor, secret, shared, enabled, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING {}"#,
            CREDENTIAL_COLUMNS
        );
        let row = sqlx::query_as::<_, Credential>(&sql)
            .bind(new.owner_user_id)
            .bind(normalize_vendor(&new.vendor))
            .bind(&new.secret)
            .bind(new.shared)
            .bind(new.enabled)
            .bind(created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_credential(&self, id: Uuid) -> anyhow::Result<Option<Credential>> {
        self.fetch_credential("id = $1", id, None).await
    }

    async fn list_credentials(&self, owner_user_id: Uuid) -> anyhow::Result<Vec<Credential>> {
        let sql = format!(
            "SELECT {} FROM credentials WHERE owner_user_id = $1 ORDER BY created_at ASC, id ASC",
            CREDENTIAL_COLUMNS
        );
        let rows = sqlx::query_as::<_, Credential>(&sql)
            .bind(owner_user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn set_credential_enabled(&self, id: Uuid, enabled: bool) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE credentials SET enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_credential(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Resolution lookups --

    async fn find_owned_credential(
        &self,
        owner_user_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Credential>> {
        self.fetch_credential("id = $1 AND owner_user_id = $2", id, Some(owner_user_id))
            .await
    }

    async fn find_shared_credential(&self, id: Uuid) -> anyhow::Result<Option<Credential>> {
        self.fetch_credential("id = $1 AND shared = TRUE", id, None).await
    }

    async fn first_owned_enabled(
        &self,
        owner_user_id: Uuid,
        vendor: &str,
    ) -> anyhow::Result<Option<Credential>> {
        let sql = format!(
            r#"SELECT {} FROM credentials
               WHERE owner_user_id = $1 AND vendor = $2 AND enabled = TRUE
               ORDER BY created_at ASC, id ASC
               LIMIT 1"#,
            CREDENTIAL_COLUMNS
        );
        let row = sqlx::query_as::<_, Credential>(&sql)
            .bind(owner_user_id)
            .bind(vendor)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn first_shared_available(
        &self,
        vendor: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Credential>> {
        let sql = format!(
            r#"SELECT {} FROM credentials
               WHERE vendor = $1 AND shared = TRUE AND enabled = TRUE
                 AND (shared_disabled_until IS NULL OR shared_disabled_until < $2)
               ORDER BY created_at ASC, id ASC
               LIMIT 1"#,
            CREDENTIAL_COLUMNS
        );
        let row = sqlx::query_as::<_, Credential>(&sql)
            .bind(vendor)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn save_breaker(&self, id: Uuid, breaker: &SharedBreaker) -> anyhow::Result<()> {
        sqlx::query(
            r#"UPDATE credentials
               SET shared_failure_count = $2,
                   shared_last_failure_at = $3,
                   shared_disabled_until = $4
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(breaker.failure_count)
        .bind(breaker.last_failure_at)
        .bind(breaker.disabled_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Task bindings --

    async fn upsert_task_mapping(&self, mapping: &TaskTokenMapping) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO task_token_mappings (task_id, vendor, token_id, user_id, expires_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (task_id, vendor) DO UPDATE
                   SET token_id   = EXCLUDED.token_id,
                       user_id    = EXCLUDED.user_id,
                       expires_at = EXCLUDED.expires_at"#,
        )
        .bind(&mapping.task_id)
        .bind(&mapping.vendor)
        .bind(mapping.token_id)
        .bind(mapping.user_id)
        .bind(mapping.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_task_status(&self, status: &TaskStatus) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO task_statuses (task_id, vendor, status, updated_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (task_id, vendor) DO UPDATE
                   SET status     = EXCLUDED.status,
                       updated_at = EXCLUDED.updated_at"#,
        )
        .bind(&status.task_id)
        .bind(&status.vendor)
        .bind(&status.status)
        .bind(status.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task_mapping(
        &self,
        task_id: &str,
        vendor: &str,
    ) -> anyhow::Result<Option<TaskTokenMapping>> {
        let row = sqlx::query_as::<_, TaskTokenMapping>(
            r#"SELECT task_id, vendor, token_id, user_id, expires_at
               FROM task_token_mappings
               WHERE task_id = $1 AND vendor = $2"#,
        )
        .bind(task_id)
        .bind(vendor)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_task_status(
        &self,
        task_id: &str,
        vendor: &str,
    ) -> anyhow::Result<Option<TaskStatus>> {
        let row = sqlx::query_as::<_, TaskStatus>(
            "SELECT task_id, vendor, status, updated_at FROM task_statuses WHERE task_id = $1 AND vendor = $2",
        )
        .bind(task_id)
        .bind(vendor)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_expired_mappings(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM task_token_mappings WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
