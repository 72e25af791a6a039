//! Bridge between the backend and live reader connections.

use std::net::SocketAddr;
use std::sync::Arc;

use attractap_core::services::{CardStore, ReaderStore, UserDirectory};
use attractap_core::{CardId, ConnectionId, ReaderId, ResourceId, UserId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::connection::{Command, Inbound, serve_connection};
use crate::correlation::CorrelationTable;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{DomainEvent, DomainEventBus};
use crate::firmware::FirmwareCache;
use crate::registry::ConnectionRegistry;
use crate::services::Services;
use crate::states::{EnrollCard, ReaderState, ResetCard};

/// State shared by every connection of one gateway
#[derive(Debug)]
pub(crate) struct Shared<S> {
    pub(crate) services: Arc<S>,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) correlations: Arc<CorrelationTable>,
    pub(crate) firmware: FirmwareCache,
    pub(crate) events: DomainEventBus,
    pub(crate) config: GatewayConfig,
}

/// Entry point for serving reader connections and steering them from
/// the outside.
///
/// # Example
///
/// ```no_run
/// use attractap_gateway::memory::InMemoryServices;
/// use attractap_gateway::{Gateway, GatewayConfig};
/// use tokio::net::TcpListener;
///
/// # async fn example() -> std::io::Result<()> {
/// let gateway = Gateway::new(InMemoryServices::new(), GatewayConfig::default());
/// gateway.spawn_event_listener();
///
/// let listener = TcpListener::bind("127.0.0.1:7300").await?;
/// let (stream, addr) = listener.accept().await?;
/// gateway.serve(stream, Some(addr)).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Gateway<S: Services> {
    shared: Arc<Shared<S>>,
}

impl<S: Services> Clone for Gateway<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: Services> Gateway<S> {
    pub fn new(services: Arc<S>, config: GatewayConfig) -> Self {
        Self::with_event_bus(services, config, DomainEventBus::default())
    }

    /// Create a gateway that publishes to and listens on `events`.
    pub fn with_event_bus(services: Arc<S>, config: GatewayConfig, events: DomainEventBus) -> Self {
        Self {
            shared: Arc::new(Shared {
                services,
                registry: ConnectionRegistry::new(),
                correlations: Arc::new(CorrelationTable::new()),
                firmware: FirmwareCache::new(config.firmware_chunk_size),
                events,
                config,
            }),
        }
    }

    pub fn services(&self) -> &Arc<S> {
        &self.shared.services
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.shared.registry
    }

    pub fn events(&self) -> &DomainEventBus {
        &self.shared.events
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    /// Run the protocol on `stream` until the connection closes.
    pub async fn serve<T>(&self, stream: T, remote_addr: Option<SocketAddr>)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        serve_connection(self.shared.clone(), stream, remote_addr).await;
    }

    /// Put the reader into card enrollment for `user_id`.
    ///
    /// Resolves once the reader has entered enrollment mode.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ReaderNotFound`], [`GatewayError::UserNotFound`] or
    /// [`GatewayError::ReaderNotConnected`] before anything is sent;
    /// [`GatewayError::ConnectionClosed`] if the reader dropped while
    /// switching.
    pub async fn start_enrollment(&self, reader_id: ReaderId, user_id: UserId) -> GatewayResult<()> {
        let connection = self.resolve_reader(reader_id).await?;
        let user = self
            .shared
            .services
            .users()
            .find_one(user_id)
            .await?
            .ok_or(GatewayError::UserNotFound(user_id))?;

        info!(reader_id = %reader_id, user_id = %user_id, "starting card enrollment");
        self.transition(reader_id, connection, ReaderState::from(EnrollCard::new(user)))
            .await
    }

    /// Put the reader into reset mode for the card `card_id`.
    ///
    /// # Errors
    ///
    /// As [`Gateway::start_enrollment`], plus [`GatewayError::CardNotFound`]
    /// when the card does not exist.
    pub async fn start_reset(
        &self,
        reader_id: ReaderId,
        card_id: CardId,
        user_id: UserId,
    ) -> GatewayResult<()> {
        let connection = self.resolve_reader(reader_id).await?;
        let services = &self.shared.services;

        let user = services
            .users()
            .find_one(user_id)
            .await?
            .ok_or(GatewayError::UserNotFound(user_id))?;
        let card = services
            .cards()
            .get_by_id(card_id)
            .await?
            .ok_or(GatewayError::CardNotFound(card_id))?;

        info!(reader_id = %reader_id, card_id = %card_id, user_id = %user_id, "starting card reset");
        self.transition(reader_id, connection, ReaderState::from(ResetCard::new(card, user)))
            .await
    }

    /// Send every connection of the reader back through authentication.
    ///
    /// Returns the number of connections restarted.
    pub fn restart_connections_for_reader(&self, reader_id: ReaderId) -> usize {
        let connections = self.shared.registry.connections_for_reader(reader_id);
        debug!(reader_id = %reader_id, connections = connections.len(), "restarting reader connections");

        connections
            .into_iter()
            .filter(|id| {
                self.shared
                    .registry
                    .dispatch(*id, Inbound::Command(Command::Restart))
            })
            .count()
    }

    /// Refresh readers showing the resource, skipping those in the middle
    /// of a usage toggle.
    ///
    /// Returns the number of connections notified.
    pub fn notify_usage_changed(&self, resource_id: ResourceId) -> usize {
        let registry = &self.shared.registry;

        registry
            .connections_for_resource(resource_id)
            .into_iter()
            .filter(|id| {
                let busy = registry.status(*id).is_some_and(|status| status.is_busy());
                if busy {
                    debug!(connection_id = %id, resource_id = %resource_id, "skipping busy connection");
                }
                !busy
            })
            .filter(|id| registry.dispatch(*id, Inbound::Command(Command::UsageChanged { resource_id })))
            .count()
    }

    /// Route domain events from the bus to the affected connections.
    pub fn spawn_event_listener(&self) -> JoinHandle<()> {
        let gateway = self.clone();
        let mut events = self.shared.events.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => gateway.on_domain_event(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("event listener stopped");
        })
    }

    fn on_domain_event(&self, event: &DomainEvent) {
        debug!(event = event.name(), "routing domain event");
        match event {
            DomainEvent::ReaderUpdated { reader_id } | DomainEvent::ReaderDeleted { reader_id } => {
                self.restart_connections_for_reader(*reader_id);
            }
            DomainEvent::UsageChanged { resource_id, .. } => {
                self.notify_usage_changed(*resource_id);
            }
        }
    }

    async fn resolve_reader(&self, reader_id: ReaderId) -> GatewayResult<ConnectionId> {
        self.shared
            .services
            .readers()
            .find_by_id(reader_id)
            .await?
            .ok_or(GatewayError::ReaderNotFound(reader_id))?;

        self.shared
            .registry
            .connections_for_reader(reader_id)
            .into_iter()
            .next()
            .ok_or(GatewayError::ReaderNotConnected(reader_id))
    }

    async fn transition(
        &self,
        reader_id: ReaderId,
        connection: ConnectionId,
        state: ReaderState,
    ) -> GatewayResult<()> {
        let (reply, done) = oneshot::channel();
        let command = Command::Transition { state, reply };

        if !self
            .shared
            .registry
            .dispatch(connection, Inbound::Command(command))
        {
            return Err(GatewayError::ReaderNotConnected(reader_id));
        }

        done.await.map_err(|_| GatewayError::ConnectionClosed)?
    }
}
