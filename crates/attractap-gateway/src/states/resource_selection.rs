//! Resource picker for readers with more than one resource.

use attractap_core::ResourceId;
use attractap_core::constants::{MSG_INVALID_RESOURCE, MSG_SELECT_RESOURCE, MSG_UNKNOWN_RESOURCE};
use attractap_protocol::payloads::{SelectItem, SelectOption, SelectedItem};
use attractap_protocol::{Message, MessageType};
use tracing::debug;

use super::{AfterTap, WaitForNfcTap, unexpected};
use crate::context::ReaderContext;
use crate::error::GatewayResult;
use crate::machine::{StateHandler, StateKind, Transition};
use crate::services::Services;

/// Lets the user pick one of several resources before tapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaitForResourceSelection;

impl StateHandler for WaitForResourceSelection {
    fn kind(&self) -> StateKind {
        StateKind::WaitForResourceSelection
    }

    async fn on_enter<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<Transition> {
        let options = ctx
            .require_reader()?
            .resources
            .iter()
            .map(|resource| SelectOption {
                id: resource.id,
                label: resource.name.clone(),
            })
            .collect();

        ctx.send_event(
            MessageType::SelectItem,
            &SelectItem {
                label: MSG_SELECT_RESOURCE.to_string(),
                options,
            },
        )?;
        Ok(Transition::Stay)
    }

    async fn on_event<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        if !message.is(&MessageType::SelectItem) {
            return Err(unexpected(self.kind(), &message));
        }

        let selected: SelectedItem = message.payload_as()?;
        let Some(id) = selected.selected_id else {
            ctx.flash_error(MSG_INVALID_RESOURCE).await?;
            return Ok(Transition::Restart);
        };

        let Some(resource) = ctx.require_reader()?.resource(ResourceId::new(id)).cloned() else {
            debug!(connection_id = %ctx.id(), selected_id = id, "selected resource is not attached");
            ctx.flash_error(MSG_UNKNOWN_RESOURCE).await?;
            return Ok(Transition::Restart);
        };

        let timeout = ctx.config().selection_tap_timeout;
        Ok(Transition::to(
            WaitForNfcTap::new(resource)
                .with_idle_timeout(timeout, AfterTap::ResourceSelection)
                .with_success(AfterTap::ResourceSelection),
        ))
    }
}
