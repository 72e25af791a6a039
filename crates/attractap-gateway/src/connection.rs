//! Per-connection tasks and the acknowledged send.
//!
//! Each connection runs three cooperating parts:
//!
//! - the reader task decodes frames, echoes heartbeats, resolves
//!   acknowledgements and queues everything else for the dispatcher;
//! - the dispatcher owns the [`StateMachine`] and handles one queued item
//!   at a time, to completion;
//! - the writer task owns the sink and serializes outbound frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use attractap_core::services::ReaderStore;
use attractap_core::{ConnectionId, ResourceId};
use attractap_protocol::{Envelope, Frame, Message, MessageKind, ReaderCodec, TypeTag};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::context::ReaderContext;
use crate::correlation::CorrelationTable;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::Shared;
use crate::machine::StateMachine;
use crate::registry::ConnectionStatus;
use crate::services::Services;
use crate::states::ReaderState;

/// Retry policy of [`ConnectionHandle::send_with_ack`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPolicy {
    pub timeout: Duration,
    pub attempts: u32,
}

/// Requests from outside the connection, handled by its dispatcher
#[derive(Debug)]
pub enum Command {
    /// Switch to `state`; the reply reports whether the switch completed
    Transition {
        state: ReaderState,
        reply: oneshot::Sender<GatewayResult<()>>,
    },
    /// Start over from authentication
    Restart,
    /// Usage of a bound resource changed elsewhere
    UsageChanged { resource_id: ResourceId },
}

/// Items queued for a connection's dispatcher
#[derive(Debug)]
pub enum Inbound {
    Event(Message),
    Response(Message),
    IdleTimeout { generation: u64 },
    Command(Command),
    Closed,
}

/// Sending half of a connection, cheap to clone
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Frame>,
    correlations: Arc<CorrelationTable>,
    policy: AckPolicy,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        outbound: mpsc::UnboundedSender<Frame>,
        correlations: Arc<CorrelationTable>,
        policy: AckPolicy,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            outbound,
            correlations,
            policy,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message without waiting for an acknowledgement.
    pub fn send(&self, message: Message) -> GatewayResult<()> {
        trace!(connection_id = %self.id, kind = %message.kind, tag = %message.tag, "sending");
        self.send_envelope(&Envelope::Message(message))
    }

    pub fn send_envelope(&self, envelope: &Envelope) -> GatewayResult<()> {
        let frame = Frame::try_from(envelope)?;
        self.outbound
            .send(frame)
            .map_err(|_| GatewayError::ConnectionClosed)
    }

    /// Queue an opaque binary frame. Binary frames are never acknowledged.
    pub fn send_binary(&self, data: Bytes) -> GatewayResult<()> {
        trace!(connection_id = %self.id, bytes = data.len(), "sending binary frame");
        self.outbound
            .send(Frame::Binary(data))
            .map_err(|_| GatewayError::ConnectionClosed)
    }

    /// Send `message` and wait for `ACK_<TYPE>`, retransmitting on timeout.
    ///
    /// Every attempt registers a fresh awaiter and removes it when its
    /// timeout elapses, so an acknowledgement only ever completes the
    /// attempt that is still waiting.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ProtocolTimeout`] once all attempts timed out
    /// - [`GatewayError::ConnectionClosed`] if the connection went away
    /// - [`GatewayError::UnexpectedMessage`] for messages that cannot be acknowledged
    pub async fn send_with_ack(&self, message: Message) -> GatewayResult<Message> {
        let Some(message_type) = message.message_type().cloned() else {
            return Err(GatewayError::UnexpectedMessage(format!(
                "cannot await an acknowledgement of {}",
                message.tag
            )));
        };
        let tag = TypeTag::Ack(message_type.clone());

        for attempt in 1..=self.policy.attempts {
            let (awaiter, reply) = self.correlations.register(self.id, tag.clone());

            if let Err(e) = self.send(message.clone()) {
                self.correlations.remove(self.id, awaiter);
                return Err(e);
            }

            match tokio::time::timeout(self.policy.timeout, reply).await {
                Ok(Ok(ack)) => return Ok(ack),
                Ok(Err(_)) => return Err(GatewayError::ConnectionClosed),
                Err(_) => {
                    self.correlations.remove(self.id, awaiter);
                    warn!(
                        connection_id = %self.id,
                        message_type = %message_type,
                        attempt,
                        max_attempts = self.policy.attempts,
                        "acknowledgement timed out"
                    );
                }
            }
        }

        Err(GatewayError::ProtocolTimeout {
            message_type: message_type.to_string(),
            attempts: self.policy.attempts,
        })
    }

    /// Ask every task of this connection to stop.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Run one connection until it closes.
pub(crate) async fn serve_connection<S, T>(
    shared: Arc<Shared<S>>,
    stream: T,
    remote_addr: Option<SocketAddr>,
) where
    S: Services,
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = ConnectionId::new();
    let codec = ReaderCodec::with_max_frame_size(shared.config.max_frame_size);
    let (sink, frames) = Framed::new(stream, codec).split();

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(
        id,
        outbound_tx,
        shared.correlations.clone(),
        shared.config.ack_policy(),
    );
    let status = Arc::new(ConnectionStatus::new());

    shared
        .registry
        .register(id, inbound_tx.clone(), status.clone(), remote_addr);
    info!(connection_id = %id, remote_addr = ?remote_addr, "reader connected");

    let writer = tokio::spawn(write_frames(id, sink, outbound_rx, handle.closed()));
    let reader = tokio::spawn(read_frames(
        shared.clone(),
        handle.clone(),
        frames,
        inbound_tx.clone(),
        handle.closed(),
    ));

    let mut ctx = ReaderContext::new(shared.clone(), handle.clone(), status, inbound_tx);
    dispatch(&mut ctx, inbound_rx).await;
    drop(ctx);

    handle.close();
    if let Err(e) = reader.await {
        error!(connection_id = %id, error = %e, "reader task failed");
    }
    if let Err(e) = writer.await {
        error!(connection_id = %id, error = %e, "writer task failed");
    }

    let dropped = shared.correlations.purge(id);
    shared.registry.remove(id);
    info!(connection_id = %id, dropped_awaiters = dropped, "reader disconnected");
}

async fn dispatch<S: Services>(
    ctx: &mut ReaderContext<S>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    let mut machine = StateMachine::new();

    if let Err(e) = machine.start(ctx).await {
        error!(connection_id = %ctx.id(), error = %e, "failed to start state machine");
        return;
    }

    while let Some(item) = inbound.recv().await {
        let result = match item {
            Inbound::Event(message) => machine.handle_event(ctx, message).await,
            Inbound::Response(message) => machine.handle_response(ctx, message).await,
            Inbound::IdleTimeout { generation } => machine.handle_idle_timeout(ctx, generation).await,
            Inbound::Command(command) => machine.handle_command(ctx, command).await,
            Inbound::Closed => break,
        };

        if let Err(e) = result {
            if e.is_fatal() {
                error!(
                    connection_id = %ctx.id(),
                    state = %machine.kind(),
                    error = %e,
                    "closing connection"
                );
                break;
            }
            warn!(connection_id = %ctx.id(), state = %machine.kind(), error = %e, "handler failed");
        }
    }
}

async fn read_frames<S, St>(
    shared: Arc<Shared<S>>,
    handle: ConnectionHandle,
    mut frames: St,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut closed: watch::Receiver<bool>,
) where
    S: Services,
    St: Stream<Item = attractap_core::Result<Frame>> + Unpin,
{
    let id = handle.id();
    let liveness = shared.config.liveness_timeout;

    loop {
        let next = tokio::select! {
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
            next = next_frame(&mut frames, liveness) => next,
        };

        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                warn!(connection_id = %id, error = %e, "undecodable frame, closing");
                break;
            }
            Ok(None) => {
                debug!(connection_id = %id, "peer closed the stream");
                break;
            }
            Err(_) => {
                warn!(connection_id = %id, timeout = ?liveness, "no traffic within liveness timeout");
                break;
            }
        };

        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(data) => {
                warn!(connection_id = %id, bytes = data.len(), "ignoring inbound binary frame");
                continue;
            }
        };

        let envelope = match Envelope::from_json(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection_id = %id, error = %e, "dropping malformed message");
                continue;
            }
        };

        match envelope {
            Envelope::Heartbeat => on_heartbeat(&shared, &handle).await,
            Envelope::Message(message) if message.is_ack() => {
                let resolved = shared.correlations.resolve(id, &message);
                if resolved == 0 {
                    debug!(connection_id = %id, tag = %message.tag, "acknowledgement without awaiter");
                }
            }
            Envelope::Message(message) => {
                trace!(connection_id = %id, kind = %message.kind, tag = %message.tag, "received");
                touch_reader(&shared, id).await;
                let item = match message.kind {
                    MessageKind::Event => Inbound::Event(message),
                    MessageKind::Response => Inbound::Response(message),
                };
                if inbound.send(item).is_err() {
                    break;
                }
            }
        }
    }

    shared.correlations.purge(id);
    let _ = inbound.send(Inbound::Closed);
}

async fn next_frame<St>(
    frames: &mut St,
    liveness: Option<Duration>,
) -> Result<Option<attractap_core::Result<Frame>>, tokio::time::error::Elapsed>
where
    St: Stream<Item = attractap_core::Result<Frame>> + Unpin,
{
    match liveness {
        Some(limit) => tokio::time::timeout(limit, frames.next()).await,
        None => Ok(frames.next().await),
    }
}

async fn on_heartbeat<S: Services>(shared: &Shared<S>, handle: &ConnectionHandle) {
    let id = handle.id();
    trace!(connection_id = %id, "heartbeat");

    touch_reader(shared, id).await;

    if let Err(e) = handle.send_envelope(&Envelope::Heartbeat) {
        debug!(connection_id = %id, error = %e, "heartbeat echo not sent");
    }
}

/// Record traffic from an authenticated reader as its last connection time.
async fn touch_reader<S: Services>(shared: &Shared<S>, id: ConnectionId) {
    if let Some(reader_id) = shared.registry.bound_reader(id)
        && let Err(e) = shared.services.readers().update_last_connection(reader_id).await
    {
        warn!(connection_id = %id, reader_id = %reader_id, error = %e, "failed to record last connection");
    }
}

async fn write_frames<Si>(
    id: ConnectionId,
    mut sink: Si,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut closed: watch::Receiver<bool>,
) where
    Si: Sink<Frame, Error = attractap_core::Error> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(connection_id = %id, error = %e, "write failed");
                        return;
                    }
                }
                None => break,
            },
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
        }
    }

    // Deliver what was queued before the close, e.g. a final error screen
    while let Ok(frame) = outbound.try_recv() {
        if sink.feed(frame).await.is_err() {
            return;
        }
    }
    let _ = sink.close().await;
}
