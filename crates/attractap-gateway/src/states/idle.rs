//! Dispatch after authentication.

use attractap_core::services::FirmwareCatalog;
use attractap_protocol::Message;
use tracing::{debug, warn};

use super::{
    FirmwareUpdateStreaming, NoResourcesAttached, WaitForNfcTap, WaitForResourceSelection,
    unexpected,
};
use crate::context::ReaderContext;
use crate::error::GatewayResult;
use crate::machine::{StateHandler, StateKind, Transition};
use crate::services::Services;

/// Picks the working state of an authenticated reader.
///
/// Outdated firmware wins over everything else, then the number of
/// attached resources decides.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleDispatch;

impl StateHandler for IdleDispatch {
    fn kind(&self) -> StateKind {
        StateKind::IdleDispatch
    }

    async fn on_enter<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<Transition> {
        let reader = ctx.require_reader()?.clone();

        if let Some(current) = &reader.firmware {
            match ctx.services().firmware().is_outdated(current).await {
                Ok(true) => {
                    debug!(connection_id = %ctx.id(), reader_id = %reader.id, firmware = %current, "firmware outdated");
                    return Ok(Transition::to(FirmwareUpdateStreaming::default()));
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(connection_id = %ctx.id(), reader_id = %reader.id, error = %e, "firmware check failed");
                }
            }
        }

        Ok(match reader.resources.as_slice() {
            [] => Transition::to(NoResourcesAttached),
            [resource] => Transition::to(WaitForNfcTap::new(resource.clone())),
            _ => Transition::to(WaitForResourceSelection),
        })
    }

    async fn on_event<S: Services>(
        &mut self,
        _ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        Err(unexpected(self.kind(), &message))
    }
}
