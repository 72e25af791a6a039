//! Collaborator contracts consumed by the reader gateway.
//!
//! The gateway never talks to a database or a file system directly. Each
//! concern is a small trait here; `attractap-storage` provides SQLite and
//! filesystem implementations, the gateway ships in-memory ones for tests.
//!
//! # Implementation Note
//!
//! Methods are declared as `fn ... -> impl Future<Output = _> + Send`
//! rather than `async fn` so that connection tasks generic over these
//! traits stay `Send` and can be spawned on the multi-threaded runtime.
//! Implementors can still write plain `async fn` bodies.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::{
    CardId, CardRecord, CardUid, FirmwareDefinition, FirmwareDescriptor, KeySeed, Maintenance,
    NewCard, NewReader, ReaderId, ReaderIdentity, ReaderUpdate, ResourceId, Result, UsageSession,
    User, UserId,
};

/// Byte stream of a firmware binary.
pub type FirmwareStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Enrolled card records.
pub trait CardStore: Send + Sync {
    /// Look up the card a reader just saw.
    fn get_by_uid(&self, uid: &CardUid) -> impl Future<Output = Result<Option<CardRecord>>> + Send;

    fn get_by_id(&self, id: CardId) -> impl Future<Output = Result<Option<CardRecord>>> + Send;

    fn create(&self, card: NewCard) -> impl Future<Output = Result<CardRecord>> + Send;

    /// Delete a card record. Deleting a missing card is an error.
    fn delete(&self, id: CardId) -> impl Future<Output = Result<()>> + Send;
}

/// Reader identities and their bindings.
pub trait ReaderStore: Send + Sync {
    fn find_by_id(&self, id: ReaderId) -> impl Future<Output = Result<Option<ReaderIdentity>>> + Send;

    fn create_new(&self, reader: NewReader) -> impl Future<Output = Result<ReaderIdentity>> + Send;

    fn update(
        &self,
        id: ReaderId,
        update: ReaderUpdate,
    ) -> impl Future<Output = Result<ReaderIdentity>> + Send;

    /// Stamp the reader as seen now. Also sets the first connection time
    /// if it was never set.
    fn update_last_connection(&self, id: ReaderId) -> impl Future<Output = Result<()>> + Send;
}

/// Resource usage sessions.
pub trait UsageService: Send + Sync {
    fn get_active_session(
        &self,
        resource: ResourceId,
    ) -> impl Future<Output = Result<Option<UsageSession>>> + Send;

    fn start_session(
        &self,
        resource: ResourceId,
        user: &User,
        notes: &str,
    ) -> impl Future<Output = Result<UsageSession>> + Send;

    fn end_session(
        &self,
        resource: ResourceId,
        user: &User,
        notes: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Maintenance windows of resources.
pub trait MaintenanceService: Send + Sync {
    /// Maintenance windows currently covering the resource.
    fn find_active_maintenance(
        &self,
        resource: ResourceId,
    ) -> impl Future<Output = Result<Vec<Maintenance>>> + Send;
}

/// Available reader firmware.
pub trait FirmwareCatalog: Send + Sync {
    fn get_definition(
        &self,
        name: &str,
        variant: &str,
    ) -> impl Future<Output = Result<Option<FirmwareDefinition>>> + Send;

    fn get_binary_stream(
        &self,
        definition: &FirmwareDefinition,
    ) -> impl Future<Output = Result<FirmwareStream>> + Send;

    fn get_binary_size(&self, definition: &FirmwareDefinition) -> impl Future<Output = Result<u64>> + Send;

    /// Whether `current` should be replaced. Unknown firmware is never outdated.
    fn is_outdated(&self, current: &FirmwareDescriptor) -> impl Future<Output = Result<bool>> + Send {
        async move {
            let definition = self.get_definition(&current.name, &current.variant).await?;
            Ok(definition.is_some_and(|d| d.supersedes(current)))
        }
    }
}

/// Users and their key seeds.
pub trait UserDirectory: Send + Sync {
    fn find_one(&self, id: UserId) -> impl Future<Output = Result<Option<User>>> + Send;

    /// Persist `candidate` as the user's key seed unless one exists, and
    /// return whichever seed is stored afterwards.
    ///
    /// Implementations must make the check and the insert atomic so two
    /// concurrent enrollments of the same user agree on one seed.
    fn ensure_key_seed(
        &self,
        id: UserId,
        candidate: KeySeed,
    ) -> impl Future<Output = Result<KeySeed>> + Send;
}
