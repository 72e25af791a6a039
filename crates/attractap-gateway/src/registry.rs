//! Live connections and the readers bound to them.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use attractap_core::constants::MAX_TRANSITION_HISTORY;
use attractap_core::{ConnectionId, ReaderId, ResourceId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::connection::Inbound;
use crate::machine::StateKind;

/// One entry of a connection's transition history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    /// `None` for the initial state
    pub from: Option<StateKind>,
    pub to: StateKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StatusInner {
    state: Option<StateKind>,
    history: VecDeque<StateTransition>,
}

/// State kind, busy flag and history of one connection.
///
/// Written by the connection's dispatcher, read by the bridge.
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    inner: Mutex<StatusInner>,
    busy: AtomicBool,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<StateKind> {
        self.inner.lock().state
    }

    /// Record entering `to`, dropping the oldest entry beyond the history bound.
    pub fn record(&self, to: StateKind) {
        let mut inner = self.inner.lock();
        let from = inner.state.replace(to);

        if inner.history.len() >= MAX_TRANSITION_HISTORY {
            inner.history.pop_front();
        }
        inner.history.push_back(StateTransition {
            from,
            to,
            at: Utc::now(),
        });
    }

    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Get the last N transitions, newest first
    pub fn last_transitions(&self, n: usize) -> Vec<StateTransition> {
        self.inner.lock().history.iter().rev().take(n).cloned().collect()
    }

    /// Whether a usage toggle is being processed
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
struct Binding {
    reader_id: ReaderId,
    resource_ids: Vec<ResourceId>,
}

#[derive(Debug)]
struct Entry {
    inbound: mpsc::UnboundedSender<Inbound>,
    status: Arc<ConnectionStatus>,
    binding: RwLock<Option<Binding>>,
    remote_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
}

/// Snapshot of a registered connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub reader_id: Option<ReaderId>,
    pub resource_ids: Vec<ResourceId>,
    pub state: Option<StateKind>,
    pub busy: bool,
    pub history: Vec<StateTransition>,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Entry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        id: ConnectionId,
        inbound: mpsc::UnboundedSender<Inbound>,
        status: Arc<ConnectionStatus>,
        remote_addr: Option<SocketAddr>,
    ) {
        self.connections.insert(
            id,
            Entry {
                inbound,
                status,
                binding: RwLock::new(None),
                remote_addr,
                connected_at: Utc::now(),
            },
        );
        tracing::debug!(connection_id = %id, total = self.connections.len(), "connection registered");
    }

    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            tracing::debug!(connection_id = %id, total = self.connections.len(), "connection removed");
        }
        removed
    }

    /// Bind an authenticated reader and its resources to a connection.
    pub fn bind(&self, id: ConnectionId, reader_id: ReaderId, resource_ids: Vec<ResourceId>) {
        if let Some(entry) = self.connections.get(&id) {
            *entry.binding.write() = Some(Binding {
                reader_id,
                resource_ids,
            });
        }
    }

    pub fn unbind(&self, id: ConnectionId) {
        if let Some(entry) = self.connections.get(&id) {
            *entry.binding.write() = None;
        }
    }

    pub fn bound_reader(&self, id: ConnectionId) -> Option<ReaderId> {
        self.connections
            .get(&id)
            .and_then(|entry| entry.binding.read().as_ref().map(|b| b.reader_id))
    }

    /// Every registered connection, bound or not
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn connections_for_reader(&self, reader_id: ReaderId) -> Vec<ConnectionId> {
        self.matching(|binding| binding.reader_id == reader_id)
    }

    pub fn connections_for_resource(&self, resource_id: ResourceId) -> Vec<ConnectionId> {
        self.matching(|binding| binding.resource_ids.contains(&resource_id))
    }

    fn matching(&self, predicate: impl Fn(&Binding) -> bool) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.binding.read().as_ref().is_some_and(&predicate))
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|entry| {
            let binding = entry.binding.read().clone();
            ConnectionInfo {
                id,
                reader_id: binding.as_ref().map(|b| b.reader_id),
                resource_ids: binding.map(|b| b.resource_ids).unwrap_or_default(),
                state: entry.status.state(),
                busy: entry.status.is_busy(),
                history: entry.status.history(),
                remote_addr: entry.remote_addr,
                connected_at: entry.connected_at,
            }
        })
    }

    /// Queue an inbound item for a connection's dispatcher.
    ///
    /// Returns `false` when the connection is gone.
    pub(crate) fn dispatch(&self, id: ConnectionId, inbound: Inbound) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|entry| entry.inbound.send(inbound).is_ok())
    }

    pub(crate) fn status(&self, id: ConnectionId) -> Option<Arc<ConnectionStatus>> {
        self.connections.get(&id).map(|entry| entry.status.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
