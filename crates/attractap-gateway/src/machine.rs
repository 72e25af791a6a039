//! Per-connection state machine.
//!
//! The machine owns exactly one [`ReaderState`] at a time. Switching
//! states always runs the old state's exit hook to completion before the
//! new state is installed and entered, and a failing hook closes the
//! connection instead of leaving a half-entered state behind.

use std::fmt;
use std::future::Future;

use attractap_protocol::{Message, MessageType};
use tracing::{debug, warn};

use crate::connection::Command;
use crate::context::ReaderContext;
use crate::error::{GatewayError, GatewayResult, LifecyclePhase};
use crate::services::Services;
use crate::states::{Bootstrap, IdleDispatch, ReaderState};

/// Discriminant of a [`ReaderState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Bootstrap,
    IdleDispatch,
    NoResourcesAttached,
    WaitForResourceSelection,
    WaitForNfcTap,
    EnrollCard,
    ResetCard,
    FirmwareUpdateStreaming,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a handler wants to happen next
#[derive(Debug)]
pub enum Transition {
    Stay,
    /// Exit and re-enter the current state
    Restart,
    To(Box<ReaderState>),
}

impl Transition {
    pub fn to(state: impl Into<ReaderState>) -> Self {
        Transition::To(Box::new(state.into()))
    }
}

/// Behaviour of one reader state.
///
/// Handlers return the next [`Transition`]; they never switch states
/// themselves.
pub trait StateHandler: Send {
    fn kind(&self) -> StateKind;

    /// Runs once when the state is installed, including after a restart.
    ///
    /// Returning anything but [`Transition::Stay`] leaves the state again
    /// right away.
    fn on_enter<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
    ) -> impl Future<Output = GatewayResult<Transition>> + Send;

    /// Cleanup before the next state is entered, such as switching the
    /// scanner off. Errors here close the connection.
    fn on_exit<S: Services>(
        &mut self,
        _ctx: &mut ReaderContext<S>,
    ) -> impl Future<Output = GatewayResult<()>> + Send {
        async { Ok(()) }
    }

    /// Unsolicited event from the reader.
    fn on_event<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> impl Future<Output = GatewayResult<Transition>> + Send;

    /// Only called with replies whose type equals [`StateHandler::expected_response`].
    fn on_response<S: Services>(
        &mut self,
        _ctx: &mut ReaderContext<S>,
        _message: Message,
    ) -> impl Future<Output = GatewayResult<Transition>> + Send {
        async { Ok(Transition::Stay) }
    }

    /// A timer from [`ReaderContext::schedule_idle_timeout`] expired.
    ///
    /// `generation` identifies the timer. States compare it with their own
    /// pending timer and ignore anything older.
    fn on_idle_timeout<S: Services>(
        &mut self,
        _ctx: &mut ReaderContext<S>,
        _generation: u64,
    ) -> impl Future<Output = GatewayResult<Transition>> + Send {
        async { Ok(Transition::Stay) }
    }

    /// Reply type the state is currently waiting for
    fn expected_response(&self) -> Option<MessageType> {
        None
    }
}

pub struct StateMachine {
    state: ReaderState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ReaderState::Bootstrap(Bootstrap::default()),
        }
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    pub fn state(&self) -> &ReaderState {
        &self.state
    }

    /// Enter the initial state.
    pub async fn start<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<()> {
        let kind = self.state.kind();
        ctx.status().record(kind);
        debug!(connection_id = %ctx.id(), state = %kind, "entering initial state");

        let next = self
            .state
            .on_enter(ctx)
            .await
            .map_err(|e| GatewayError::lifecycle(kind, LifecyclePhase::Enter, e))?;
        self.apply(ctx, next).await
    }

    /// Carry out `transition`, following any transitions requested by
    /// the entered states.
    pub async fn apply<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        mut transition: Transition,
    ) -> GatewayResult<()> {
        loop {
            let next = match transition {
                Transition::Stay => return Ok(()),
                Transition::Restart => None,
                Transition::To(state) => Some(*state),
            };

            let from = self.state.kind();
            self.state
                .on_exit(ctx)
                .await
                .map_err(|e| GatewayError::lifecycle(from, LifecyclePhase::Exit, e))?;

            if let Some(state) = next {
                self.state = state;
            }

            let to = self.state.kind();
            ctx.status().record(to);
            debug!(connection_id = %ctx.id(), from = %from, to = %to, "state transition");

            transition = self
                .state
                .on_enter(ctx)
                .await
                .map_err(|e| GatewayError::lifecycle(to, LifecyclePhase::Enter, e))?;
        }
    }

    pub async fn handle_event<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<()> {
        let next = self.state.on_event(ctx, message).await?;
        self.apply(ctx, next).await
    }

    /// Deliver a reply, unless the current state is not waiting for its type.
    pub async fn handle_response<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<()> {
        let expected = self.state.expected_response();
        if expected.is_none() || message.message_type() != expected.as_ref() {
            warn!(
                connection_id = %ctx.id(),
                state = %self.kind(),
                tag = %message.tag,
                expected = ?expected,
                "dropping unexpected response"
            );
            return Ok(());
        }

        let next = self.state.on_response(ctx, message).await?;
        self.apply(ctx, next).await
    }

    pub async fn handle_idle_timeout<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        generation: u64,
    ) -> GatewayResult<()> {
        let next = self.state.on_idle_timeout(ctx, generation).await?;
        self.apply(ctx, next).await
    }

    pub async fn handle_command<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        command: Command,
    ) -> GatewayResult<()> {
        match command {
            Command::Transition { state, reply } => {
                let result = self.apply(ctx, Transition::To(Box::new(state))).await;
                // Failed transitions close the connection, the caller only learns that
                let _ = reply.send(match &result {
                    Ok(()) => Ok(()),
                    Err(_) => Err(GatewayError::ConnectionClosed),
                });
                result
            }
            Command::Restart => self.apply(ctx, Transition::to(Bootstrap::default())).await,
            Command::UsageChanged { resource_id } => {
                let refreshable = matches!(
                    self.kind(),
                    StateKind::WaitForNfcTap | StateKind::WaitForResourceSelection
                );
                if !refreshable || ctx.status().is_busy() {
                    debug!(
                        connection_id = %ctx.id(),
                        state = %self.kind(),
                        resource_id = %resource_id,
                        "usage change does not interrupt current state"
                    );
                    return Ok(());
                }
                self.apply(ctx, Transition::to(IdleDispatch)).await
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
