//! In-memory collaborators.
//!
//! Used by the test suites and by a server started without a database.
//! Each store keeps its records behind a `parking_lot` mutex and enforces
//! the same uniqueness rules as the SQLite schema.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use attractap_core::services::{
    CardStore, FirmwareCatalog, FirmwareStream, MaintenanceService, ReaderStore, UsageService,
    UserDirectory,
};
use attractap_core::{
    CardId, CardRecord, CardUid, Error, FirmwareDefinition, KeySeed, Maintenance, MaintenanceId,
    NewCard, NewReader, ReaderId, ReaderIdentity, ReaderUpdate, Resource, ResourceId, Result,
    SessionId, UsageSession, User, UserId,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::services::Services;

#[derive(Debug)]
struct Sequence(AtomicI64);

impl Sequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self(AtomicI64::new(1))
    }
}

#[derive(Debug, Default)]
pub struct MemoryCardStore {
    cards: Mutex<BTreeMap<CardId, CardRecord>>,
    ids: Sequence,
}

impl MemoryCardStore {
    pub fn all(&self) -> Vec<CardRecord> {
        self.cards.lock().values().cloned().collect()
    }
}

impl CardStore for MemoryCardStore {
    async fn get_by_uid(&self, uid: &CardUid) -> Result<Option<CardRecord>> {
        Ok(self.cards.lock().values().find(|c| &c.uid == uid).cloned())
    }

    async fn get_by_id(&self, id: CardId) -> Result<Option<CardRecord>> {
        Ok(self.cards.lock().get(&id).cloned())
    }

    async fn create(&self, card: NewCard) -> Result<CardRecord> {
        let mut cards = self.cards.lock();
        if cards.values().any(|c| c.uid == card.uid) {
            return Err(Error::Storage(format!("card uid {} already exists", card.uid)));
        }

        let record = CardRecord {
            id: CardId::new(self.ids.next()),
            uid: card.uid,
            keys: card.keys,
            owner: card.owner,
            last_seen: None,
        };
        cards.insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete(&self, id: CardId) -> Result<()> {
        self.cards
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::RecordNotFound(format!("Card with id={id}")))
    }
}

#[derive(Debug, Default)]
pub struct MemoryReaderStore {
    readers: Mutex<BTreeMap<ReaderId, ReaderIdentity>>,
    resources: Mutex<BTreeMap<ResourceId, Resource>>,
    reader_ids: Sequence,
    resource_ids: Sequence,
}

impl MemoryReaderStore {
    pub fn add_resource(&self, name: &str) -> Resource {
        let resource = Resource {
            id: ResourceId::new(self.resource_ids.next()),
            name: name.to_string(),
            description: None,
        };
        self.resources.lock().insert(resource.id, resource.clone());
        resource
    }

    /// Remove a reader, as an administrator deleting it would.
    pub fn remove(&self, id: ReaderId) -> Option<ReaderIdentity> {
        self.readers.lock().remove(&id)
    }

    pub fn get(&self, id: ReaderId) -> Option<ReaderIdentity> {
        self.readers.lock().get(&id).cloned()
    }

    fn lookup_resources(&self, ids: &[ResourceId]) -> Result<Vec<Resource>> {
        let resources = self.resources.lock();
        ids.iter()
            .map(|id| {
                resources
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::RecordNotFound(format!("Resource with id={id}")))
            })
            .collect()
    }
}

impl ReaderStore for MemoryReaderStore {
    async fn find_by_id(&self, id: ReaderId) -> Result<Option<ReaderIdentity>> {
        Ok(self.get(id))
    }

    async fn create_new(&self, reader: NewReader) -> Result<ReaderIdentity> {
        let identity = ReaderIdentity {
            id: ReaderId::new(self.reader_ids.next()),
            name: reader.name,
            api_token_hash: reader.api_token_hash,
            firmware: reader.firmware,
            resources: Vec::new(),
            first_connection: None,
            last_connection: None,
        };
        self.readers.lock().insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn update(&self, id: ReaderId, update: ReaderUpdate) -> Result<ReaderIdentity> {
        let resources = match &update.resource_ids {
            Some(ids) => Some(self.lookup_resources(ids)?),
            None => None,
        };

        let mut readers = self.readers.lock();
        let reader = readers
            .get_mut(&id)
            .ok_or_else(|| Error::RecordNotFound(format!("Reader with id={id}")))?;

        if let Some(name) = update.name {
            reader.name = name;
        }
        if let Some(firmware) = update.firmware {
            reader.firmware = Some(firmware);
        }
        if let Some(resources) = resources {
            reader.resources = resources;
        }
        Ok(reader.clone())
    }

    async fn update_last_connection(&self, id: ReaderId) -> Result<()> {
        let mut readers = self.readers.lock();
        let reader = readers
            .get_mut(&id)
            .ok_or_else(|| Error::RecordNotFound(format!("Reader with id={id}")))?;

        let now = Utc::now();
        reader.last_connection = Some(now);
        reader.first_connection.get_or_insert(now);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    users: Mutex<BTreeMap<UserId, (User, Option<KeySeed>)>>,
    ids: Sequence,
}

impl MemoryUserDirectory {
    pub fn add_user(&self, username: &str) -> User {
        let user = User {
            id: UserId::new(self.ids.next()),
            username: username.to_string(),
        };
        self.users.lock().insert(user.id, (user.clone(), None));
        user
    }

    pub fn remove(&self, id: UserId) {
        self.users.lock().remove(&id);
    }

    pub fn key_seed(&self, id: UserId) -> Option<KeySeed> {
        self.users.lock().get(&id).and_then(|(_, seed)| seed.clone())
    }
}

impl UserDirectory for MemoryUserDirectory {
    async fn find_one(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.lock().get(&id).map(|(user, _)| user.clone()))
    }

    async fn ensure_key_seed(&self, id: UserId, candidate: KeySeed) -> Result<KeySeed> {
        let mut users = self.users.lock();
        let (_, seed) = users
            .get_mut(&id)
            .ok_or_else(|| Error::RecordNotFound(format!("User with id={id}")))?;
        Ok(seed.get_or_insert(candidate).clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryUsageService {
    sessions: Mutex<Vec<UsageSession>>,
    notes: Mutex<Vec<String>>,
    ids: Sequence,
}

impl MemoryUsageService {
    pub fn sessions(&self) -> Vec<UsageSession> {
        self.sessions.lock().clone()
    }

    /// Notes passed to every start and end call, in order
    pub fn notes(&self) -> Vec<String> {
        self.notes.lock().clone()
    }
}

impl UsageService for MemoryUsageService {
    async fn get_active_session(&self, resource: ResourceId) -> Result<Option<UsageSession>> {
        Ok(self
            .sessions
            .lock()
            .iter()
            .find(|s| s.resource_id == resource && s.ended_at.is_none())
            .cloned())
    }

    async fn start_session(&self, resource: ResourceId, user: &User, notes: &str) -> Result<UsageSession> {
        let mut sessions = self.sessions.lock();
        if sessions
            .iter()
            .any(|s| s.resource_id == resource && s.ended_at.is_none())
        {
            return Err(Error::Storage(format!("resource {resource} is already in use")));
        }

        let session = UsageSession {
            id: SessionId::new(self.ids.next()),
            resource_id: resource,
            user_id: user.id,
            username: user.username.clone(),
            started_at: Utc::now(),
            ended_at: None,
        };
        sessions.push(session.clone());
        self.notes.lock().push(notes.to_string());
        Ok(session)
    }

    async fn end_session(&self, resource: ResourceId, _user: &User, notes: &str) -> Result<()> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.resource_id == resource && s.ended_at.is_none())
            .ok_or_else(|| Error::RecordNotFound(format!("active session on resource {resource}")))?;

        session.ended_at = Some(Utc::now());
        self.notes.lock().push(notes.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryMaintenanceService {
    windows: Mutex<Vec<Maintenance>>,
    ids: Sequence,
}

impl MemoryMaintenanceService {
    pub fn add(
        &self,
        resource: ResourceId,
        reason: Option<&str>,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
    ) -> Maintenance {
        let maintenance = Maintenance {
            id: MaintenanceId::new(self.ids.next()),
            resource_id: resource,
            reason: reason.map(str::to_string),
            start_time,
            end_time,
        };
        self.windows.lock().push(maintenance.clone());
        maintenance
    }
}

impl MaintenanceService for MemoryMaintenanceService {
    async fn find_active_maintenance(&self, resource: ResourceId) -> Result<Vec<Maintenance>> {
        let now = Utc::now();
        Ok(self
            .windows
            .lock()
            .iter()
            .filter(|m| m.resource_id == resource && m.is_active_at(now))
            .cloned()
            .collect())
    }
}

/// Firmware catalog holding binaries in memory
#[derive(Debug, Default)]
pub struct MemoryFirmwareCatalog {
    firmwares: Mutex<HashMap<(String, String), (FirmwareDefinition, Bytes)>>,
    streams: AtomicUsize,
}

impl MemoryFirmwareCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `definition` the latest firmware of its name and variant.
    pub fn publish(&self, definition: FirmwareDefinition, binary: Bytes) {
        let key = (definition.name.clone(), definition.variant.clone());
        self.firmwares.lock().insert(key, (definition, binary));
    }

    /// How many binary streams were opened
    pub fn stream_count(&self) -> usize {
        self.streams.load(Ordering::Relaxed)
    }

    fn binary(&self, definition: &FirmwareDefinition) -> Result<Bytes> {
        self.firmwares
            .lock()
            .get(&(definition.name.clone(), definition.variant.clone()))
            .filter(|(known, _)| known.version == definition.version)
            .map(|(_, binary)| binary.clone())
            .ok_or_else(|| Error::Firmware(format!("no binary for {}", definition.descriptor())))
    }
}

impl FirmwareCatalog for MemoryFirmwareCatalog {
    async fn get_definition(&self, name: &str, variant: &str) -> Result<Option<FirmwareDefinition>> {
        Ok(self
            .firmwares
            .lock()
            .get(&(name.to_string(), variant.to_string()))
            .map(|(definition, _)| definition.clone()))
    }

    async fn get_binary_stream(&self, definition: &FirmwareDefinition) -> Result<FirmwareStream> {
        let binary = self.binary(definition)?;
        self.streams.fetch_add(1, Ordering::Relaxed);

        // Deliver in uneven parts so consumers cannot rely on part boundaries
        let parts: Vec<std::io::Result<Bytes>> = (0..binary.len())
            .step_by(1000)
            .map(|start| Ok(binary.slice(start..(start + 1000).min(binary.len()))))
            .collect();
        Ok(Box::pin(futures::stream::iter(parts)))
    }

    async fn get_binary_size(&self, definition: &FirmwareDefinition) -> Result<u64> {
        Ok(self.binary(definition)?.len() as u64)
    }
}

/// All collaborators in memory
#[derive(Debug, Default)]
pub struct InMemoryServices {
    pub cards: MemoryCardStore,
    pub readers: MemoryReaderStore,
    pub users: MemoryUserDirectory,
    pub usage: MemoryUsageService,
    pub maintenance: MemoryMaintenanceService,
    pub firmware: MemoryFirmwareCatalog,
}

impl InMemoryServices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Services for InMemoryServices {
    type Cards = MemoryCardStore;
    type Readers = MemoryReaderStore;
    type Users = MemoryUserDirectory;
    type Usage = MemoryUsageService;
    type Maintenance = MemoryMaintenanceService;
    type Firmware = MemoryFirmwareCatalog;

    fn cards(&self) -> &Self::Cards {
        &self.cards
    }

    fn readers(&self) -> &Self::Readers {
        &self.readers
    }

    fn users(&self) -> &Self::Users {
        &self.users
    }

    fn usage(&self) -> &Self::Usage {
        &self.usage
    }

    fn maintenance(&self) -> &Self::Maintenance {
        &self.maintenance
    }

    fn firmware(&self) -> &Self::Firmware {
        &self.firmware
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_card_uid_is_unique() {
        let cards = MemoryCardStore::default();
        let card = NewCard {
            uid: CardUid::new("04AA").unwrap(),
            keys: BTreeMap::new(),
            owner: UserId::new(1),
        };

        let created = cards.create(card.clone()).await.unwrap();
        assert!(matches!(cards.create(card).await, Err(Error::Storage(_))));

        cards.delete(created.id).await.unwrap();
        assert!(matches!(cards.delete(created.id).await, Err(Error::RecordNotFound(_))));
        assert!(cards.get_by_id(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_update_replaces_resources() {
        let readers = MemoryReaderStore::default();
        let laser = readers.add_resource("Laser");
        let lathe = readers.add_resource("Lathe");
        let reader = readers
            .create_new(NewReader {
                name: "AB12".into(),
                api_token_hash: "hash".into(),
                firmware: None,
            })
            .await
            .unwrap();

        let updated = readers
            .update(reader.id, ReaderUpdate::new().resource_ids(vec![laser.id, lathe.id]))
            .await
            .unwrap();
        assert_eq!(updated.resource_ids(), vec![laser.id, lathe.id]);

        let unknown = ReaderUpdate::new().resource_ids(vec![ResourceId::new(99)]);
        assert!(readers.update(reader.id, unknown).await.is_err());
        assert_eq!(readers.get(reader.id).unwrap().resources.len(), 2);
    }

    #[tokio::test]
    async fn test_key_seed_is_kept() {
        let users = MemoryUserDirectory::default();
        let user = users.add_user("ada");

        let first = KeySeed::from_bytes(&[1; 32]);
        assert_eq!(users.ensure_key_seed(user.id, first.clone()).await.unwrap(), first);
        assert_eq!(
            users.ensure_key_seed(user.id, KeySeed::from_bytes(&[2; 32])).await.unwrap(),
            first
        );
        assert!(users.ensure_key_seed(UserId::new(42), first).await.is_err());
    }

    #[tokio::test]
    async fn test_usage_allows_one_open_session() {
        let usage = MemoryUsageService::default();
        let user = User {
            id: UserId::new(1),
            username: "ada".into(),
        };
        let resource = ResourceId::new(3);

        usage.start_session(resource, &user, "a").await.unwrap();
        assert!(usage.start_session(resource, &user, "b").await.is_err());
        usage.end_session(resource, &user, "c").await.unwrap();
        assert!(usage.get_active_session(resource).await.unwrap().is_none());
        assert_eq!(usage.notes(), vec!["a", "c"]);
    }
}
