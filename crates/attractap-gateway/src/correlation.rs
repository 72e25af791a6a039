//! Awaiters for acknowledgements.
//!
//! One table serves every connection of the process. Each entry waits for
//! a reply with a given type tag on a given connection. Registration,
//! resolution and purging all happen under a single mutex so a reply
//! racing a retry can never be lost or delivered twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use attractap_core::ConnectionId;
use attractap_protocol::{Message, TypeTag};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Identifier of one registered awaiter
pub type AwaiterId = u64;

#[derive(Debug)]
struct Awaiter {
    id: AwaiterId,
    tag: TypeTag,
    tx: oneshot::Sender<Message>,
}

#[derive(Debug, Default)]
pub struct CorrelationTable {
    awaiters: Mutex<HashMap<ConnectionId, Vec<Awaiter>>>,
    next_id: AtomicU64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next message tagged `tag` on `connection`.
    pub fn register(
        &self,
        connection: ConnectionId,
        tag: TypeTag,
    ) -> (AwaiterId, oneshot::Receiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.awaiters
            .lock()
            .entry(connection)
            .or_default()
            .push(Awaiter { id, tag, tx });

        (id, rx)
    }

    /// Hand `message` to every awaiter of its tag and return how many
    /// were still listening.
    pub fn resolve(&self, connection: ConnectionId, message: &Message) -> usize {
        let matched: Vec<Awaiter> = {
            let mut table = self.awaiters.lock();
            let Some(pending) = table.get_mut(&connection) else {
                return 0;
            };

            let (matched, rest) = std::mem::take(pending)
                .into_iter()
                .partition(|awaiter| awaiter.tag == message.tag);
            *pending = rest;
            if pending.is_empty() {
                table.remove(&connection);
            }
            matched
        };

        matched
            .into_iter()
            .map(|awaiter| awaiter.tx.send(message.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    /// Drop a single awaiter, e.g. after its timeout elapsed.
    pub fn remove(&self, connection: ConnectionId, id: AwaiterId) -> bool {
        let mut table = self.awaiters.lock();
        let Some(pending) = table.get_mut(&connection) else {
            return false;
        };

        let before = pending.len();
        pending.retain(|awaiter| awaiter.id != id);
        let removed = pending.len() != before;
        if pending.is_empty() {
            table.remove(&connection);
        }
        removed
    }

    /// Drop every awaiter of a connection. Their receivers observe a
    /// closed channel.
    pub fn purge(&self, connection: ConnectionId) -> usize {
        self.awaiters
            .lock()
            .remove(&connection)
            .map_or(0, |pending| pending.len())
    }

    pub fn pending(&self, connection: ConnectionId) -> usize {
        self.awaiters
            .lock()
            .get(&connection)
            .map_or(0, |pending| pending.len())
    }
}
