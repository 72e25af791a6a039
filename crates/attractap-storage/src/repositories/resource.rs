use attractap_core::{Resource, ResourceId};
use sqlx::SqlitePool;

use crate::error::StorageResult;
use crate::models::ResourceRow;

/// Resources readers can be attached to.
///
/// The gateway only reads resources through their readers; this
/// repository exists for provisioning and tests.
#[derive(Debug, Clone)]
pub struct SqliteResourceRepository {
    pool: SqlitePool,
}

impl SqliteResourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, name: &str, description: Option<&str>) -> StorageResult<Resource> {
        let result = sqlx::query("INSERT INTO resources (name, description) VALUES (?, ?)")
            .bind(name)
            .bind(description)
            .execute(&self.pool)
            .await?;

        Ok(Resource {
            id: ResourceId::new(result.last_insert_rowid()),
            name: name.to_string(),
            description: description.map(str::to_string),
        })
    }

    pub async fn find_by_id(&self, id: ResourceId) -> StorageResult<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            "SELECT id, name, description FROM resources WHERE id = ?",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Resource::from))
    }
}
