//! Usage toggle by card tap.
//!
//! ```text
//! Idle ─enter─► WaitForTap ─NFC_TAP─► WaitForAuthentication ─NFC_AUTHENTICATE─► toggle
//!                  │                        │                                   │
//!                  │ idle timeout           │ unknown card / auth failed         │ success
//!                  ▼                        ▼                                   ▼
//!              fallback            DISABLE, error 5s, restart          DISPLAY_SUCCESS 10s,
//!                                                                        success state
//! ```

use std::time::Duration;

use attractap_core::constants::{
    MSG_DO_NOT_REMOVE_CARD, MSG_INVALID_CARD, MSG_RESOURCE_STARTED, MSG_RESOURCE_STOPPED,
};
use attractap_core::services::{CardStore, MaintenanceService, UsageService, UserDirectory};
use attractap_core::{CardRecord, KeySlot, Resource};
use attractap_protocol::payloads::{
    ActiveUsage, AuthenticateCardRequest, AuthenticateCardResponse, CardChecking, NfcTap,
    ResourceSummary, Text, UserSummary,
};
use attractap_protocol::{Message, MessageType};
use tracing::{debug, info, warn};

use super::{WaitForResourceSelection, unexpected};
use crate::context::{IdleTimer, ReaderContext};
use crate::error::{GatewayError, GatewayResult};
use crate::events::DomainEvent;
use crate::machine::{StateHandler, StateKind, Transition};
use crate::services::Services;

/// Where a [`WaitForNfcTap`] goes after a timeout or a completed toggle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AfterTap {
    /// Start over waiting for the next tap
    #[default]
    Restart,
    ResourceSelection,
}

impl AfterTap {
    fn transition(self) -> Transition {
        match self {
            AfterTap::Restart => Transition::Restart,
            AfterTap::ResourceSelection => Transition::to(WaitForResourceSelection),
        }
    }
}

#[derive(Debug, Default)]
enum TapPhase {
    #[default]
    Idle,
    WaitForTap,
    WaitForAuthentication {
        card: CardRecord,
    },
}

/// Starts or stops a usage session of one resource with a card tap.
#[derive(Debug)]
pub struct WaitForNfcTap {
    resource: Resource,
    idle_timeout: Option<Duration>,
    on_timeout: AfterTap,
    on_success: AfterTap,
    phase: TapPhase,
    scanning: bool,
    timer: Option<IdleTimer>,
}

impl WaitForNfcTap {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            idle_timeout: None,
            on_timeout: AfterTap::Restart,
            on_success: AfterTap::Restart,
            phase: TapPhase::Idle,
            scanning: false,
            timer: None,
        }
    }

    /// Give up waiting after `timeout` without a tap. A zero timeout
    /// disables the timer.
    pub fn with_idle_timeout(mut self, timeout: Duration, fallback: AfterTap) -> Self {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        self.on_timeout = fallback;
        self
    }

    pub fn with_success(mut self, next: AfterTap) -> Self {
        self.on_success = next;
        self
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    async fn checking_payload<S: Services>(&self, ctx: &ReaderContext<S>) -> GatewayResult<CardChecking> {
        let session = ctx.services().usage().get_active_session(self.resource.id).await?;
        let maintenances = ctx
            .services()
            .maintenance()
            .find_active_maintenance(self.resource.id)
            .await?;

        Ok(CardChecking::ToggleResourceUsage {
            resource: ResourceSummary {
                id: self.resource.id,
                name: self.resource.name.clone(),
            },
            is_active: session.is_some(),
            active_usage_session: session.map(|session| ActiveUsage {
                user: UserSummary {
                    id: session.user_id,
                    username: session.username,
                },
            }),
            has_active_maintenance: !maintenances.is_empty(),
            maintenances,
        })
    }

    async fn disable_scanning<S: Services>(&mut self, ctx: &ReaderContext<S>) -> GatewayResult<()> {
        if self.scanning {
            self.scanning = false;
            ctx.disable_card_checking().await?;
        }
        Ok(())
    }

    async fn on_tap<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        if !matches!(self.phase, TapPhase::WaitForTap) {
            debug!(connection_id = %ctx.id(), "ignoring tap while another one is processed");
            return Ok(Transition::Stay);
        }

        let tap: NfcTap = message.payload_as()?;
        self.timer = None;
        ctx.set_busy(true);
        ctx.send_event(MessageType::ShowText, &Text::new(MSG_DO_NOT_REMOVE_CARD))?;

        let card = match ctx.services().cards().get_by_uid(&tap.card_uid).await {
            Ok(card) => card,
            Err(e) => return self.abort(ctx, e.into()).await,
        };
        let Some((card, key)) = card.and_then(|card| card.key(KeySlot::MASTER).map(|key| (card, key))) else {
            debug!(connection_id = %ctx.id(), card_uid = %tap.card_uid, "unknown card");
            return self.invalid_card(ctx).await;
        };

        ctx.send_event(
            MessageType::NfcAuthenticate,
            &AuthenticateCardRequest {
                key_number: KeySlot::MASTER,
                authentication_key: key,
            },
        )?;
        self.phase = TapPhase::WaitForAuthentication { card };
        Ok(Transition::Stay)
    }

    async fn toggle<S: Services>(
        &mut self,
        ctx: &ReaderContext<S>,
        card: CardRecord,
    ) -> GatewayResult<Transition> {
        let services = ctx.services();
        let Some(user) = services.users().find_one(card.owner).await? else {
            warn!(connection_id = %ctx.id(), card_id = %card.id, user_id = %card.owner, "card owner no longer exists");
            return self.invalid_card(ctx).await;
        };

        let reader_id = ctx.require_reader()?.id;
        let notes = format!("-- by Attractap (ID: {reader_id}) with NFC Card (ID: {}) --", card.id);

        let active = match services.usage().get_active_session(self.resource.id).await? {
            Some(_) => {
                services.usage().end_session(self.resource.id, &user, &notes).await?;
                false
            }
            None => {
                services.usage().start_session(self.resource.id, &user, &notes).await?;
                true
            }
        };

        info!(
            connection_id = %ctx.id(),
            reader_id = %reader_id,
            resource_id = %self.resource.id,
            user_id = %user.id,
            active,
            "toggled resource usage"
        );
        ctx.events().emit(DomainEvent::UsageChanged {
            resource_id: self.resource.id,
            user_id: user.id,
            active,
        });

        // The reader stops scanning on its own after a successful authentication
        self.scanning = false;
        let text = if active { MSG_RESOURCE_STARTED } else { MSG_RESOURCE_STOPPED };
        ctx.flash_success(text).await?;
        ctx.set_busy(false);

        Ok(self.on_success.transition())
    }

    /// Stop scanning, show the invalid card screen and wait for the next tap.
    async fn invalid_card<S: Services>(&mut self, ctx: &ReaderContext<S>) -> GatewayResult<Transition> {
        self.phase = TapPhase::Idle;
        self.disable_scanning(ctx).await?;
        ctx.flash_error(MSG_INVALID_CARD).await?;
        ctx.set_busy(false);
        Ok(Transition::Restart)
    }

    /// Fatal errors close the connection; anything else counts as a failed tap.
    async fn abort<S: Services>(
        &mut self,
        ctx: &ReaderContext<S>,
        error: GatewayError,
    ) -> GatewayResult<Transition> {
        if error.is_fatal() {
            return Err(error);
        }
        warn!(connection_id = %ctx.id(), resource_id = %self.resource.id, error = %error, "tap processing failed");
        self.invalid_card(ctx).await
    }
}

impl StateHandler for WaitForNfcTap {
    fn kind(&self) -> StateKind {
        StateKind::WaitForNfcTap
    }

    async fn on_enter<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<Transition> {
        let payload = self.checking_payload(ctx).await?;
        ctx.enable_card_checking(&payload).await?;
        self.scanning = true;
        self.phase = TapPhase::WaitForTap;

        if let Some(timeout) = self.idle_timeout {
            self.timer = Some(ctx.schedule_idle_timeout(timeout));
        }
        Ok(Transition::Stay)
    }

    async fn on_exit<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<()> {
        self.timer = None;
        self.phase = TapPhase::Idle;
        ctx.set_busy(false);
        self.disable_scanning(ctx).await
    }

    async fn on_event<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        if !message.is(&MessageType::NfcTap) {
            return Err(unexpected(self.kind(), &message));
        }
        self.on_tap(ctx, message).await
    }

    async fn on_response<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        let TapPhase::WaitForAuthentication { card } = std::mem::take(&mut self.phase) else {
            return Ok(Transition::Stay);
        };

        let response: AuthenticateCardResponse = message.payload_as().unwrap_or_default();
        if !response.authentication_successful {
            debug!(connection_id = %ctx.id(), card_id = %card.id, "card authentication failed");
            return self.invalid_card(ctx).await;
        }

        match self.toggle(ctx, card).await {
            Ok(next) => Ok(next),
            Err(e) => self.abort(ctx, e).await,
        }
    }

    async fn on_idle_timeout<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        generation: u64,
    ) -> GatewayResult<Transition> {
        let current = self.timer.as_ref().map(IdleTimer::generation);
        if current != Some(generation) {
            debug!(connection_id = %ctx.id(), generation, "ignoring stale idle timeout");
            return Ok(Transition::Stay);
        }

        self.timer = None;
        debug!(connection_id = %ctx.id(), resource_id = %self.resource.id, "no tap before timeout");
        self.disable_scanning(ctx).await?;
        Ok(self.on_timeout.transition())
    }

    fn expected_response(&self) -> Option<MessageType> {
        match self.phase {
            TapPhase::WaitForAuthentication { .. } => Some(MessageType::NfcAuthenticate),
            _ => None,
        }
    }
}
