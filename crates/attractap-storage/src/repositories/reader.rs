use attractap_core::services::ReaderStore;
use attractap_core::{NewReader, ReaderId, ReaderIdentity, ReaderUpdate, Resource, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{StorageError, StorageResult};
use crate::models::{ReaderRow, ResourceRow};

/// SQLite implementation of [`ReaderStore`]
#[derive(Debug, Clone)]
pub struct SqliteReaderRepository {
    pool: SqlitePool,
}

impl SqliteReaderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, id: ReaderId) -> StorageResult<Option<ReaderIdentity>> {
        let row = sqlx::query_as::<_, ReaderRow>(
            r#"
            SELECT id, name, api_token_hash,
                   firmware_name, firmware_variant, firmware_version,
                   first_connection, last_connection
            FROM readers
            WHERE id = ?
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let resources = self.resources_of(id).await?;
                Ok(Some(row.into_identity(resources)))
            }
            None => Ok(None),
        }
    }

    async fn resources_of(&self, id: ReaderId) -> StorageResult<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT r.id, r.name, r.description
            FROM resources r
            JOIN reader_resources rr ON rr.resource_id = r.id
            WHERE rr.reader_id = ?
            ORDER BY r.id
            "#,
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Resource::from).collect())
    }

    pub async fn insert(&self, reader: &NewReader) -> StorageResult<ReaderIdentity> {
        let firmware = reader.firmware.as_ref();
        let result = sqlx::query(
            r#"
            INSERT INTO readers (name, api_token_hash, firmware_name, firmware_variant, firmware_version)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&reader.name)
        .bind(&reader.api_token_hash)
        .bind(firmware.map(|f| f.name.as_str()))
        .bind(firmware.map(|f| f.variant.as_str()))
        .bind(firmware.map(|f| f.version.as_str()))
        .execute(&self.pool)
        .await?;

        let id = ReaderId::new(result.last_insert_rowid());
        self.find(id)
            .await?
            .ok_or_else(|| StorageError::not_found("Reader", "id", id))
    }

    /// Apply a partial update in one transaction.
    pub async fn apply(&self, id: ReaderId, update: &ReaderUpdate) -> StorageResult<ReaderIdentity> {
        let mut tx = self.pool.begin().await?;

        let firmware = update.firmware.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE readers
            SET name = COALESCE(?, name),
                firmware_name = COALESCE(?, firmware_name),
                firmware_variant = COALESCE(?, firmware_variant),
                firmware_version = COALESCE(?, firmware_version),
                updated_at = datetime('now')
            WHERE id = ?
            "#,
        )
        .bind(update.name.as_deref())
        .bind(firmware.map(|f| f.name.as_str()))
        .bind(firmware.map(|f| f.variant.as_str()))
        .bind(firmware.map(|f| f.version.as_str()))
        .bind(id.get())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Reader", "id", id));
        }

        if let Some(resource_ids) = &update.resource_ids {
            sqlx::query("DELETE FROM reader_resources WHERE reader_id = ?")
                .bind(id.get())
                .execute(&mut *tx)
                .await?;

            for resource_id in resource_ids {
                sqlx::query("INSERT INTO reader_resources (reader_id, resource_id) VALUES (?, ?)")
                    .bind(id.get())
                    .bind(resource_id.get())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        self.find(id)
            .await?
            .ok_or_else(|| StorageError::not_found("Reader", "id", id))
    }

    pub async fn touch(&self, id: ReaderId) -> StorageResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE readers
            SET last_connection = ?,
                first_connection = COALESCE(first_connection, ?)
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id.get())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Reader", "id", id));
        }

        Ok(())
    }

    pub async fn delete(&self, id: ReaderId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM readers WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Reader", "id", id));
        }

        Ok(())
    }
}

impl ReaderStore for SqliteReaderRepository {
    async fn find_by_id(&self, id: ReaderId) -> Result<Option<ReaderIdentity>> {
        Ok(self.find(id).await?)
    }

    async fn create_new(&self, reader: NewReader) -> Result<ReaderIdentity> {
        Ok(self.insert(&reader).await?)
    }

    async fn update(&self, id: ReaderId, update: ReaderUpdate) -> Result<ReaderIdentity> {
        Ok(self.apply(id, &update).await?)
    }

    async fn update_last_connection(&self, id: ReaderId) -> Result<()> {
        Ok(self.touch(id).await?)
    }
}
