//! Handle given to state handlers for one reader connection.
//!
//! Wraps the outbound side of the connection with the display and
//! scanner helpers every state needs, plus idle timers that report back
//! through the connection's inbound queue.

use std::sync::Arc;
use std::time::Duration;

use attractap_core::{ConnectionId, ReaderIdentity};
use attractap_protocol::payloads::{CardChecking, Text};
use attractap_protocol::{Message, MessageType};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::connection::{ConnectionHandle, Inbound};
use crate::error::{GatewayError, GatewayResult};
use crate::events::DomainEventBus;
use crate::firmware::FirmwareCache;
use crate::gateway::Shared;
use crate::registry::ConnectionStatus;
use crate::services::Services;

/// Everything a state handler may touch: the connection, its bound
/// reader and the shared collaborators.
pub struct ReaderContext<S: Services> {
    shared: Arc<Shared<S>>,
    connection: ConnectionHandle,
    status: Arc<ConnectionStatus>,
    inbound: mpsc::UnboundedSender<Inbound>,
    reader: Option<ReaderIdentity>,
    timer_generation: u64,
}

impl<S: Services> ReaderContext<S> {
    pub(crate) fn new(
        shared: Arc<Shared<S>>,
        connection: ConnectionHandle,
        status: Arc<ConnectionStatus>,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Self {
        Self {
            shared,
            connection,
            status,
            inbound,
            reader: None,
            timer_generation: 0,
        }
    }

    /// Id of the underlying connection, used as `connection_id` in logs
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn services(&self) -> &S {
        &self.shared.services
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    pub fn events(&self) -> &DomainEventBus {
        &self.shared.events
    }

    pub fn firmware_cache(&self) -> &FirmwareCache {
        &self.shared.firmware
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Reader bound by a successful registration or authentication
    pub fn reader(&self) -> Option<&ReaderIdentity> {
        self.reader.as_ref()
    }

    /// The bound reader, or an error for unauthenticated connections.
    pub fn require_reader(&self) -> GatewayResult<&ReaderIdentity> {
        self.reader.as_ref().ok_or_else(|| {
            GatewayError::UnexpectedMessage("connection is not authenticated".to_string())
        })
    }

    /// Bind `reader` to this connection, replacing any earlier binding.
    pub fn bind(&mut self, reader: ReaderIdentity) {
        self.shared
            .registry
            .bind(self.id(), reader.id, reader.resource_ids());
        self.reader = Some(reader);
    }

    pub fn unbind(&mut self) {
        self.shared.registry.unbind(self.id());
        self.reader = None;
    }

    /// Queue `message` without waiting for the reader.
    pub fn send(&self, message: Message) -> GatewayResult<()> {
        self.connection.send(message)
    }

    pub fn send_event<P: Serialize>(&self, message_type: MessageType, payload: &P) -> GatewayResult<()> {
        self.send(Message::typed_event(message_type, payload)?)
    }

    /// Send `message` and wait for the reader's acknowledgement.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ProtocolTimeout`]
    /// when no acknowledgement arrives in time, which closes the connection.
    pub async fn send_with_ack(&self, message: Message) -> GatewayResult<Message> {
        self.connection.send_with_ack(message).await
    }

    /// Switch the reader's NFC scanner on for `purpose`, waiting for the ack.
    pub async fn enable_card_checking(&self, purpose: &CardChecking) -> GatewayResult<()> {
        let message = Message::typed_event(MessageType::NfcEnableCardChecking, purpose)?;
        self.send_with_ack(message).await.map(drop)
    }

    pub async fn disable_card_checking(&self) -> GatewayResult<()> {
        self.send_with_ack(Message::bare_event(MessageType::NfcDisableCardChecking))
            .await
            .map(drop)
    }

    /// Show `text` on the reader display for `delay`, then clear it.
    pub async fn flash(
        &self,
        display: MessageType,
        clear: MessageType,
        text: &str,
        delay: Duration,
    ) -> GatewayResult<()> {
        self.send_event(display, &Text::new(text))?;
        tokio::time::sleep(delay).await;
        self.send(Message::bare_event(clear))
    }

    pub async fn flash_error(&self, text: &str) -> GatewayResult<()> {
        let delay = self.config().error_feedback;
        self.flash(MessageType::DisplayError, MessageType::ClearError, text, delay)
            .await
    }

    pub async fn flash_success(&self, text: &str) -> GatewayResult<()> {
        let delay = self.config().success_feedback;
        self.flash(MessageType::DisplaySuccess, MessageType::ClearSuccess, text, delay)
            .await
    }

    /// Queue an [`Inbound::IdleTimeout`] for this connection after `after`.
    ///
    /// Dropping the returned timer cancels it.
    pub fn schedule_idle_timeout(&mut self, after: Duration) -> IdleTimer {
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let inbound = self.inbound.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = inbound.send(Inbound::IdleTimeout { generation });
        });

        IdleTimer { generation, task }
    }

    /// Mark the reader as in the middle of a card operation for status queries.
    pub fn set_busy(&self, busy: bool) {
        self.status.set_busy(busy);
    }
}

/// Pending idle timeout, aborted on drop
#[derive(Debug)]
pub struct IdleTimer {
    generation: u64,
    task: JoinHandle<()>,
}

impl IdleTimer {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
