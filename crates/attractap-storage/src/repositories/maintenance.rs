use attractap_core::services::MaintenanceService;
use attractap_core::{Maintenance, MaintenanceId, ResourceId, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::StorageResult;
use crate::models::MaintenanceRow;

/// SQLite implementation of [`MaintenanceService`]
#[derive(Debug, Clone)]
pub struct SqliteMaintenanceRepository {
    pool: SqlitePool,
}

impl SqliteMaintenanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        resource: ResourceId,
        reason: Option<&str>,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
    ) -> StorageResult<Maintenance> {
        let result = sqlx::query(
            r#"
            INSERT INTO maintenances (resource_id, reason, start_time, end_time)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(resource.get())
        .bind(reason)
        .bind(start_time)
        .bind(end_time)
        .execute(&self.pool)
        .await?;

        Ok(Maintenance {
            id: MaintenanceId::new(result.last_insert_rowid()),
            resource_id: resource,
            reason: reason.map(str::to_string),
            start_time,
            end_time,
        })
    }

    /// Windows of `resource` covering `at`.
    ///
    /// Filtering happens on typed timestamps rather than on the TEXT
    /// columns, whose string order is not guaranteed to be time order.
    pub async fn active_at(&self, resource: ResourceId, at: DateTime<Utc>) -> StorageResult<Vec<Maintenance>> {
        let rows = sqlx::query_as::<_, MaintenanceRow>(
            r#"
            SELECT id, resource_id, reason, start_time, end_time
            FROM maintenances
            WHERE resource_id = ?
            ORDER BY start_time
            "#,
        )
        .bind(resource.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(Maintenance::from)
            .filter(|m| m.is_active_at(at))
            .collect())
    }
}

impl MaintenanceService for SqliteMaintenanceRepository {
    async fn find_active_maintenance(&self, resource: ResourceId) -> Result<Vec<Maintenance>> {
        Ok(self.active_at(resource, Utc::now()).await?)
    }
}
