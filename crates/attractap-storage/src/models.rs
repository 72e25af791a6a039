//! Row types mapping database tables onto domain types.
//!
//! Rows keep the raw column representation (integers, TEXT keys, JSON
//! strings). Conversion into `attractap_core` types validates the values
//! and reports [`StorageError::Corrupt`] when the database holds something
//! the domain cannot represent.

use std::collections::BTreeMap;

use attractap_core::{
    CardId, CardRecord, CardUid, FirmwareDescriptor, Key128, KeySlot, Maintenance, MaintenanceId,
    ReaderId, ReaderIdentity, Resource, ResourceId, SessionId, UsageSession, User, UserId,
};
use chrono::{DateTime, Utc};

use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReaderRow {
    pub id: i64,
    pub name: String,
    pub api_token_hash: String,
    pub firmware_name: Option<String>,
    pub firmware_variant: Option<String>,
    pub firmware_version: Option<String>,
    pub first_connection: Option<DateTime<Utc>>,
    pub last_connection: Option<DateTime<Utc>>,
}

impl ReaderRow {
    pub fn into_identity(self, resources: Vec<Resource>) -> ReaderIdentity {
        let firmware = match (self.firmware_name, self.firmware_variant, self.firmware_version) {
            (Some(name), Some(variant), Some(version)) => Some(FirmwareDescriptor {
                name,
                variant,
                version,
            }),
            _ => None,
        };

        ReaderIdentity {
            id: ReaderId::new(self.id),
            name: self.name,
            api_token_hash: self.api_token_hash,
            firmware,
            resources,
            first_connection: self.first_connection,
            last_connection: self.last_connection,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResourceRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Resource {
            id: ResourceId::new(row.id),
            name: row.name,
            description: row.description,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId::new(row.id),
            username: row.username,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CardRow {
    pub id: i64,
    pub uid: String,
    pub user_id: i64,
    /// JSON object mapping key slot numbers to hex keys
    pub keys: String,
    pub last_seen: Option<DateTime<Utc>>,
}

impl TryFrom<CardRow> for CardRecord {
    type Error = StorageError;

    fn try_from(row: CardRow) -> StorageResult<Self> {
        let uid = CardUid::new(&row.uid)
            .map_err(|e| StorageError::Corrupt(format!("card {}: {e}", row.id)))?;

        Ok(CardRecord {
            id: CardId::new(row.id),
            uid,
            keys: decode_keys(&row.keys)
                .map_err(|e| StorageError::Corrupt(format!("card {}: {e}", row.id)))?,
            owner: UserId::new(row.user_id),
            last_seen: row.last_seen,
        })
    }
}

/// Serialize card keys as `{"0": "<hex>", ...}`.
pub fn encode_keys(keys: &BTreeMap<KeySlot, Key128>) -> StorageResult<String> {
    let raw: BTreeMap<String, String> = keys
        .iter()
        .map(|(slot, key)| (slot.to_string(), key.to_hex()))
        .collect();
    serde_json::to_string(&raw).map_err(|e| StorageError::Corrupt(e.to_string()))
}

pub fn decode_keys(json: &str) -> Result<BTreeMap<KeySlot, Key128>, String> {
    let raw: BTreeMap<String, String> = serde_json::from_str(json).map_err(|e| e.to_string())?;

    raw.into_iter()
        .map(|(slot, key)| {
            let slot: u8 = slot.parse().map_err(|_| format!("bad key slot '{slot}'"))?;
            let slot = KeySlot::new(slot).map_err(|e| e.to_string())?;
            let key = Key128::from_hex(&key).map_err(|e| e.to_string())?;
            Ok((slot, key))
        })
        .collect()
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageSessionRow {
    pub id: i64,
    pub resource_id: i64,
    pub user_id: i64,
    pub username: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<UsageSessionRow> for UsageSession {
    fn from(row: UsageSessionRow) -> Self {
        UsageSession {
            id: SessionId::new(row.id),
            resource_id: ResourceId::new(row.resource_id),
            user_id: UserId::new(row.user_id),
            username: row.username,
            started_at: row.started_at,
            ended_at: row.ended_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MaintenanceRow {
    pub id: i64,
    pub resource_id: i64,
    pub reason: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl From<MaintenanceRow> for Maintenance {
    fn from(row: MaintenanceRow) -> Self {
        Maintenance {
            id: MaintenanceId::new(row.id),
            resource_id: ResourceId::new(row.resource_id),
            reason: row.reason,
            start_time: row.start_time,
            end_time: row.end_time,
        }
    }
}
