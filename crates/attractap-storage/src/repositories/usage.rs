use attractap_core::services::UsageService;
use attractap_core::{ResourceId, Result, SessionId, UsageSession, User};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{StorageError, StorageResult};
use crate::models::UsageSessionRow;

/// SQLite implementation of [`UsageService`]
///
/// A resource has at most one open session, enforced by a partial unique
/// index on `usage_sessions(resource_id) WHERE ended_at IS NULL`.
#[derive(Debug, Clone)]
pub struct SqliteUsageRepository {
    pool: SqlitePool,
}

impl SqliteUsageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_open(&self, resource: ResourceId) -> StorageResult<Option<UsageSession>> {
        let row = sqlx::query_as::<_, UsageSessionRow>(
            r#"
            SELECT s.id, s.resource_id, s.user_id, u.username, s.started_at, s.ended_at
            FROM usage_sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.resource_id = ? AND s.ended_at IS NULL
            "#,
        )
        .bind(resource.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UsageSession::from))
    }

    pub async fn open(&self, resource: ResourceId, user: &User, notes: &str) -> StorageResult<UsageSession> {
        let started_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO usage_sessions (resource_id, user_id, started_at, start_notes)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(resource.get())
        .bind(user.id.get())
        .bind(started_at)
        .bind(notes)
        .execute(&self.pool)
        .await?;

        Ok(UsageSession {
            id: SessionId::new(result.last_insert_rowid()),
            resource_id: resource,
            user_id: user.id,
            username: user.username.clone(),
            started_at,
            ended_at: None,
        })
    }

    /// Close the open session of `resource`, whoever started it.
    pub async fn close(&self, resource: ResourceId, user: &User, notes: &str) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE usage_sessions
            SET ended_at = ?, end_notes = ?
            WHERE resource_id = ? AND ended_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(notes)
        .bind(resource.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("UsageSession", "resource_id", resource));
        }

        tracing::debug!(resource_id = %resource, user_id = %user.id, "usage session closed");
        Ok(())
    }
}

impl UsageService for SqliteUsageRepository {
    async fn get_active_session(&self, resource: ResourceId) -> Result<Option<UsageSession>> {
        Ok(self.find_open(resource).await?)
    }

    async fn start_session(&self, resource: ResourceId, user: &User, notes: &str) -> Result<UsageSession> {
        Ok(self.open(resource, user, notes).await?)
    }

    async fn end_session(&self, resource: ResourceId, user: &User, notes: &str) -> Result<()> {
        Ok(self.close(resource, user, notes).await?)
    }
}
