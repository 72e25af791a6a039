use attractap_core::services::CardStore;
use attractap_core::{CardId, CardRecord, CardUid, NewCard, Result, UserId};
use sqlx::SqlitePool;

use crate::error::{StorageError, StorageResult};
use crate::models::{CardRow, encode_keys};

/// SQLite implementation of [`CardStore`]
#[derive(Debug, Clone)]
pub struct SqliteCardRepository {
    pool: SqlitePool,
}

impl SqliteCardRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_uid(&self, uid: &CardUid) -> StorageResult<Option<CardRecord>> {
        let row = sqlx::query_as::<_, CardRow>(
            r#"
            SELECT id, uid, user_id, keys, last_seen
            FROM nfc_cards
            WHERE uid = ?
            "#,
        )
        .bind(uid.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CardRecord::try_from).transpose()
    }

    pub async fn find_by_id(&self, id: CardId) -> StorageResult<Option<CardRecord>> {
        let row = sqlx::query_as::<_, CardRow>(
            r#"
            SELECT id, uid, user_id, keys, last_seen
            FROM nfc_cards
            WHERE id = ?
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CardRecord::try_from).transpose()
    }

    pub async fn find_by_user(&self, user_id: UserId) -> StorageResult<Vec<CardRecord>> {
        let rows = sqlx::query_as::<_, CardRow>(
            r#"
            SELECT id, uid, user_id, keys, last_seen
            FROM nfc_cards
            WHERE user_id = ?
            ORDER BY id
            "#,
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CardRecord::try_from).collect()
    }

    pub async fn insert(&self, card: &NewCard) -> StorageResult<CardRecord> {
        let keys = encode_keys(&card.keys)?;
        let result = sqlx::query("INSERT INTO nfc_cards (uid, user_id, keys) VALUES (?, ?, ?)")
            .bind(card.uid.as_str())
            .bind(card.owner.get())
            .bind(keys)
            .execute(&self.pool)
            .await?;

        Ok(CardRecord {
            id: CardId::new(result.last_insert_rowid()),
            uid: card.uid.clone(),
            keys: card.keys.clone(),
            owner: card.owner,
            last_seen: None,
        })
    }

    pub async fn remove(&self, id: CardId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM nfc_cards WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Card", "id", id));
        }

        Ok(())
    }
}

impl CardStore for SqliteCardRepository {
    async fn get_by_uid(&self, uid: &CardUid) -> Result<Option<CardRecord>> {
        Ok(self.find_by_uid(uid).await?)
    }

    async fn get_by_id(&self, id: CardId) -> Result<Option<CardRecord>> {
        Ok(self.find_by_id(id).await?)
    }

    async fn create(&self, card: NewCard) -> Result<CardRecord> {
        Ok(self.insert(&card).await?)
    }

    async fn delete(&self, id: CardId) -> Result<()> {
        Ok(self.remove(id).await?)
    }
}
