//! The states a reader connection moves through.
//!
//! ```text
//!                ┌──────────── restart / reader updated ◄──────────┐
//!                ▼                                                  │
//!  connect ─► Bootstrap ─► IdleDispatch ─┬─► FirmwareUpdateStreaming│
//!                              ▲         ├─► NoResourcesAttached    │
//!                              │         ├─► WaitForResourceSelection ◄─┐
//!                              │         └─► WaitForNfcTap ─────────────┘
//!                              │
//!              EnrollCard / ResetCard (started through the Gateway)
//! ```

mod bootstrap;
mod enroll;
mod firmware;
mod idle;
mod nfc_tap;
mod no_resources;
mod reset;
mod resource_selection;

pub use bootstrap::Bootstrap;
pub use enroll::EnrollCard;
pub use firmware::FirmwareUpdateStreaming;
pub use idle::IdleDispatch;
pub use nfc_tap::{AfterTap, WaitForNfcTap};
pub use no_resources::NoResourcesAttached;
pub use reset::ResetCard;
pub use resource_selection::WaitForResourceSelection;

use attractap_protocol::{Message, MessageType};

use crate::context::ReaderContext;
use crate::error::GatewayResult;
use crate::machine::{StateHandler, StateKind, Transition};
use crate::services::Services;

/// The state a connection is in, with its per-state data
#[derive(Debug)]
pub enum ReaderState {
    Bootstrap(Bootstrap),
    IdleDispatch(IdleDispatch),
    NoResources(NoResourcesAttached),
    Selection(WaitForResourceSelection),
    NfcTap(WaitForNfcTap),
    Enroll(EnrollCard),
    Reset(ResetCard),
    Firmware(FirmwareUpdateStreaming),
}

macro_rules! delegate {
    ($self:ident, $state:ident => $body:expr) => {
        match $self {
            ReaderState::Bootstrap($state) => $body,
            ReaderState::IdleDispatch($state) => $body,
            ReaderState::NoResources($state) => $body,
            ReaderState::Selection($state) => $body,
            ReaderState::NfcTap($state) => $body,
            ReaderState::Enroll($state) => $body,
            ReaderState::Reset($state) => $body,
            ReaderState::Firmware($state) => $body,
        }
    };
}

impl StateHandler for ReaderState {
    fn kind(&self) -> StateKind {
        delegate!(self, state => state.kind())
    }

    async fn on_enter<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<Transition> {
        delegate!(self, state => state.on_enter(ctx).await)
    }

    async fn on_exit<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<()> {
        delegate!(self, state => state.on_exit(ctx).await)
    }

    async fn on_event<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        delegate!(self, state => state.on_event(ctx, message).await)
    }

    async fn on_response<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        delegate!(self, state => state.on_response(ctx, message).await)
    }

    async fn on_idle_timeout<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        generation: u64,
    ) -> GatewayResult<Transition> {
        delegate!(self, state => state.on_idle_timeout(ctx, generation).await)
    }

    fn expected_response(&self) -> Option<MessageType> {
        delegate!(self, state => state.expected_response())
    }
}

macro_rules! impl_from_state {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for ReaderState {
                fn from(state: $ty) -> Self {
                    ReaderState::$variant(state)
                }
            }
        )*
    };
}

impl_from_state!(
    Bootstrap(Bootstrap),
    IdleDispatch(IdleDispatch),
    NoResources(NoResourcesAttached),
    Selection(WaitForResourceSelection),
    NfcTap(WaitForNfcTap),
    Enroll(EnrollCard),
    Reset(ResetCard),
    Firmware(FirmwareUpdateStreaming),
);

/// Error for an event the current state has no use for.
pub(crate) fn unexpected(kind: StateKind, message: &Message) -> crate::error::GatewayError {
    crate::error::GatewayError::UnexpectedMessage(format!("{} in {kind}", message.tag))
}
