//! Terminal state for readers with nothing attached.

use attractap_core::constants::MSG_NO_RESOURCES;
use attractap_protocol::payloads::Text;
use attractap_protocol::{Message, MessageType};

use super::unexpected;
use crate::context::ReaderContext;
use crate::error::GatewayResult;
use crate::machine::{StateHandler, StateKind, Transition};
use crate::services::Services;

/// Reader without any resource attached; stays here until restarted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResourcesAttached;

impl StateHandler for NoResourcesAttached {
    fn kind(&self) -> StateKind {
        StateKind::NoResourcesAttached
    }

    async fn on_enter<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<Transition> {
        ctx.send_event(MessageType::DisplayError, &Text::new(MSG_NO_RESOURCES))?;
        Ok(Transition::Stay)
    }

    async fn on_exit<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<()> {
        ctx.send(Message::bare_event(MessageType::ClearError))
    }

    async fn on_event<S: Services>(
        &mut self,
        _ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        Err(unexpected(self.kind(), &message))
    }
}
