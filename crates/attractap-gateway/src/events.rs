//! Domain events exchanged between the gateway and the rest of the backend.

use attractap_core::{ReaderId, ResourceId, UserId};
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// Name, firmware or resource bindings of a reader changed
    ReaderUpdated { reader_id: ReaderId },

    ReaderDeleted { reader_id: ReaderId },

    /// A usage session on the resource started or ended
    UsageChanged {
        resource_id: ResourceId,
        user_id: UserId,
        active: bool,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::ReaderUpdated { .. } => "reader.updated",
            DomainEvent::ReaderDeleted { .. } => "reader.deleted",
            DomainEvent::UsageChanged { .. } => "usage.changed",
        }
    }
}

/// In-process fan-out of [`DomainEvent`]s
#[derive(Debug, Clone)]
pub struct DomainEventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl DomainEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event and return how many subscribers received it.
    pub fn emit(&self, event: DomainEvent) -> usize {
        tracing::debug!(event = event.name(), ?event, "emitting domain event");
        // No subscribers is not an error
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl Default for DomainEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DomainEvent::ReaderUpdated { reader_id: ReaderId::new(1) }, "reader.updated")]
    #[case(DomainEvent::ReaderDeleted { reader_id: ReaderId::new(1) }, "reader.deleted")]
    #[case(
        DomainEvent::UsageChanged { resource_id: ResourceId::new(2), user_id: UserId::new(3), active: true },
        "usage.changed"
    )]
    fn test_event_names(#[case] event: DomainEvent, #[case] name: &str) {
        assert_eq!(event.name(), name);
    }

    #[tokio::test]
    async fn test_emit_reaches_every_subscriber() {
        let bus = DomainEventBus::default();
        assert_eq!(bus.emit(DomainEvent::ReaderDeleted { reader_id: ReaderId::new(9) }), 0);

        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let event = DomainEvent::ReaderUpdated { reader_id: ReaderId::new(9) };

        assert_eq!(bus.emit(event.clone()), 2);
        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }
}
