//! Integration tests for the SQLite repositories
//!
//! These tests run every repository against a migrated in-memory database
//! through the collaborator traits the gateway consumes.
//!
//! Run with: cargo test --package attractap-storage --test integration_database

use std::collections::BTreeMap;
use std::sync::Arc;

use attractap_core::services::{
    CardStore, MaintenanceService, ReaderStore, UsageService, UserDirectory,
};
use attractap_core::{
    CardId, CardUid, Error, FirmwareDescriptor, Key128, KeySeed, KeySlot, NewCard, NewReader,
    ReaderId, ReaderUpdate, UserId,
};
use attractap_storage::{
    Database, SqliteCardRepository, SqliteMaintenanceRepository, SqliteReaderRepository,
    SqliteResourceRepository, SqliteUsageRepository, SqliteUserRepository,
};
use chrono::{Duration, Utc};
use tokio::sync::Barrier;

fn firmware(version: &str) -> FirmwareDescriptor {
    FirmwareDescriptor {
        name: "attractap".into(),
        variant: "esp32c3".into(),
        version: version.into(),
    }
}

#[tokio::test]
async fn test_in_memory_database() {
    let db = Database::in_memory().await.unwrap();
    db.health_check().await.unwrap();
    db.close().await;
}

#[tokio::test]
async fn test_migration_idempotency() {
    let db = Database::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    db.migrate().await.unwrap();
}

#[tokio::test]
async fn test_reader_lifecycle() {
    let db = Database::in_memory().await.unwrap();
    let readers = SqliteReaderRepository::new(db.pool().clone());
    let resources = SqliteResourceRepository::new(db.pool().clone());

    let reader = readers
        .create_new(NewReader {
            name: "K7QX".into(),
            api_token_hash: "pbkdf2-sha256$1$00$00".into(),
            firmware: Some(firmware("1.0.0")),
        })
        .await
        .unwrap();
    assert_eq!(reader.name, "K7QX");
    assert_eq!(reader.firmware, Some(firmware("1.0.0")));
    assert!(reader.resources.is_empty());
    assert!(reader.last_connection.is_none());

    let laser = resources.create("Laser cutter", Some("CO2")).await.unwrap();
    let lathe = resources.create("Lathe", None).await.unwrap();

    let updated = readers
        .update(
            reader.id,
            ReaderUpdate::new()
                .firmware(firmware("1.1.0"))
                .resource_ids(vec![laser.id, lathe.id]),
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "K7QX");
    assert_eq!(updated.firmware, Some(firmware("1.1.0")));
    assert_eq!(updated.resource_ids(), vec![laser.id, lathe.id]);
    assert_eq!(updated.resource(laser.id).unwrap().description.as_deref(), Some("CO2"));

    let updated = readers
        .update(reader.id, ReaderUpdate::new().resource_ids(vec![lathe.id]))
        .await
        .unwrap();
    assert_eq!(updated.resource_ids(), vec![lathe.id]);

    readers.update_last_connection(reader.id).await.unwrap();
    let first = readers.find_by_id(reader.id).await.unwrap().unwrap();
    let first_connection = first.first_connection.unwrap();
    assert!(first.last_connection.is_some());

    readers.update_last_connection(reader.id).await.unwrap();
    let second = readers.find_by_id(reader.id).await.unwrap().unwrap();
    assert_eq!(second.first_connection, Some(first_connection));

    readers.delete(reader.id).await.unwrap();
    assert!(readers.find_by_id(reader.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_reader_errors() {
    let db = Database::in_memory().await.unwrap();
    let readers = SqliteReaderRepository::new(db.pool().clone());

    assert!(readers.find_by_id(ReaderId::new(99)).await.unwrap().is_none());
    assert!(matches!(
        readers.update_last_connection(ReaderId::new(99)).await,
        Err(Error::RecordNotFound(_))
    ));
    assert!(matches!(
        readers.update(ReaderId::new(99), ReaderUpdate::new().name("X")).await,
        Err(Error::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn test_card_crud() {
    let db = Database::in_memory().await.unwrap();
    let users = SqliteUserRepository::new(db.pool().clone());
    let cards = SqliteCardRepository::new(db.pool().clone());

    let owner = users.create("ada").await.unwrap();
    let uid = CardUid::new("04A1B2C3D4E5F6").unwrap();
    let key = Key128::from_bytes([0x5A; 16]);

    let created = cards
        .create(NewCard {
            uid: uid.clone(),
            keys: BTreeMap::from([(KeySlot::MASTER, key)]),
            owner: owner.id,
        })
        .await
        .unwrap();

    let by_uid = cards.get_by_uid(&uid).await.unwrap().unwrap();
    assert_eq!(by_uid.id, created.id);
    assert_eq!(by_uid.key(KeySlot::MASTER), Some(key));
    assert_eq!(by_uid.owner, owner.id);

    let by_id = cards.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(by_id.uid, uid);
    assert_eq!(cards.find_by_user(owner.id).await.unwrap().len(), 1);

    cards.delete(created.id).await.unwrap();
    assert!(cards.get_by_uid(&uid).await.unwrap().is_none());
    assert!(matches!(
        cards.delete(created.id).await,
        Err(Error::RecordNotFound(_))
    ));
    assert!(cards.get_by_id(CardId::new(42)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_card_uid_rejected() {
    let db = Database::in_memory().await.unwrap();
    let users = SqliteUserRepository::new(db.pool().clone());
    let cards = SqliteCardRepository::new(db.pool().clone());
    let owner = users.create("ada").await.unwrap();

    let card = NewCard {
        uid: CardUid::new("04AA").unwrap(),
        keys: BTreeMap::new(),
        owner: owner.id,
    };
    cards.create(card.clone()).await.unwrap();
    assert!(matches!(cards.create(card).await, Err(Error::Storage(_))));
}

#[tokio::test]
async fn test_key_seed_written_once() {
    let db = Database::in_memory().await.unwrap();
    let users = SqliteUserRepository::new(db.pool().clone());
    let user = users.create("grace").await.unwrap();

    let first = KeySeed::from_bytes(&[1; 32]);
    let second = KeySeed::from_bytes(&[2; 32]);

    assert_eq!(users.ensure_key_seed(user.id, first.clone()).await.unwrap(), first);
    assert_eq!(users.ensure_key_seed(user.id, second).await.unwrap(), first);

    assert_eq!(users.find_one(user.id).await.unwrap().unwrap().username, "grace");
    assert!(users.find_one(UserId::new(77)).await.unwrap().is_none());
    assert!(matches!(
        users.ensure_key_seed(UserId::new(77), KeySeed::from_bytes(&[3; 32])).await,
        Err(Error::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_key_seed_agreement() {
    let db = Database::in_memory().await.unwrap();
    let users = SqliteUserRepository::new(db.pool().clone());
    let user = users.create("linus").await.unwrap();

    const NUM_CONCURRENT_TASKS: usize = 8;
    let barrier = Arc::new(Barrier::new(NUM_CONCURRENT_TASKS));

    let handles: Vec<_> = (0..NUM_CONCURRENT_TASKS)
        .map(|i| {
            let users = users.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                users
                    .ensure_key_seed(user.id, KeySeed::from_bytes(&[i as u8; 32]))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let seeds: Vec<KeySeed> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert!(seeds.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_usage_session_toggle() {
    let db = Database::in_memory().await.unwrap();
    let users = SqliteUserRepository::new(db.pool().clone());
    let resources = SqliteResourceRepository::new(db.pool().clone());
    let usage = SqliteUsageRepository::new(db.pool().clone());

    let user = users.create("ada").await.unwrap();
    let resource = resources.create("Laser", None).await.unwrap();

    assert!(usage.get_active_session(resource.id).await.unwrap().is_none());

    let session = usage.start_session(resource.id, &user, "by reader").await.unwrap();
    let active = usage.get_active_session(resource.id).await.unwrap().unwrap();
    assert_eq!(active.id, session.id);
    assert_eq!(active.username, "ada");

    // A second open session on the same resource violates the partial unique index
    assert!(usage.start_session(resource.id, &user, "again").await.is_err());

    usage.end_session(resource.id, &user, "done").await.unwrap();
    assert!(usage.get_active_session(resource.id).await.unwrap().is_none());
    assert!(matches!(
        usage.end_session(resource.id, &user, "twice").await,
        Err(Error::RecordNotFound(_))
    ));

    usage.start_session(resource.id, &user, "next").await.unwrap();
    assert!(usage.get_active_session(resource.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_active_maintenance_filter() {
    let db = Database::in_memory().await.unwrap();
    let resources = SqliteResourceRepository::new(db.pool().clone());
    let maintenance = SqliteMaintenanceRepository::new(db.pool().clone());

    let resource = resources.create("Lathe", None).await.unwrap();
    let other = resources.create("Drill", None).await.unwrap();
    let now = Utc::now();

    maintenance
        .create(resource.id, Some("past"), now - Duration::hours(5), Some(now - Duration::hours(4)))
        .await
        .unwrap();
    maintenance
        .create(resource.id, Some("open ended"), now - Duration::hours(1), None)
        .await
        .unwrap();
    maintenance
        .create(resource.id, Some("upcoming"), now + Duration::hours(1), None)
        .await
        .unwrap();
    maintenance
        .create(other.id, Some("elsewhere"), now - Duration::hours(1), None)
        .await
        .unwrap();

    let active = maintenance.find_active_maintenance(resource.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].reason.as_deref(), Some("open ended"));
}
