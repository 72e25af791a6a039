use attractap_core::services::UserDirectory;
use attractap_core::{KeySeed, Result, User, UserId};
use sqlx::SqlitePool;

use crate::error::{StorageError, StorageResult};
use crate::models::UserRow;

/// SQLite implementation of [`UserDirectory`]
#[derive(Debug, Clone)]
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, username: &str) -> StorageResult<User> {
        let result = sqlx::query("INSERT INTO users (username) VALUES (?)")
            .bind(username)
            .execute(&self.pool)
            .await?;

        Ok(User {
            id: UserId::new(result.last_insert_rowid()),
            username: username.to_string(),
        })
    }

    pub async fn find(&self, id: UserId) -> StorageResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, username FROM users WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(User::from))
    }

    /// Store `candidate` unless a seed exists, then return the stored seed.
    ///
    /// The conditional UPDATE is a single statement, so concurrent callers
    /// cannot both win.
    pub async fn key_seed_or_insert(&self, id: UserId, candidate: &KeySeed) -> StorageResult<KeySeed> {
        sqlx::query("UPDATE users SET nfc_key_seed = ? WHERE id = ? AND nfc_key_seed IS NULL")
            .bind(candidate.expose())
            .bind(id.get())
            .execute(&self.pool)
            .await?;

        let stored: Option<(Option<String>,)> =
            sqlx::query_as("SELECT nfc_key_seed FROM users WHERE id = ?")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;

        match stored {
            Some((Some(hex),)) => KeySeed::from_hex(&hex)
                .map_err(|e| StorageError::Corrupt(format!("key seed of user {id}: {e}"))),
            Some((None,)) => Err(StorageError::Corrupt(format!(
                "key seed of user {id} missing after insert"
            ))),
            None => Err(StorageError::not_found("User", "id", id)),
        }
    }
}

impl UserDirectory for SqliteUserRepository {
    async fn find_one(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.find(id).await?)
    }

    async fn ensure_key_seed(&self, id: UserId, candidate: KeySeed) -> Result<KeySeed> {
        Ok(self.key_seed_or_insert(id, &candidate).await?)
    }
}
