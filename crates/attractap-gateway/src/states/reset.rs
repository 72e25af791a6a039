//! Card reset back to the factory key.

use attractap_core::constants::{MSG_CARD_ERASED, MSG_RESET_FAILED};
use attractap_core::services::CardStore;
use attractap_core::{CardRecord, Key128, KeySlot, User};
use attractap_protocol::payloads::{
    CardChecking, CardRef, ChangeKeysRequest, ChangeKeysResponse, NfcTap, UserSummary,
};
use attractap_protocol::{Message, MessageType};
use tracing::{debug, info, warn};

use super::{IdleDispatch, unexpected};
use crate::context::ReaderContext;
use crate::error::{GatewayError, GatewayResult};
use crate::machine::{StateHandler, StateKind, Transition};
use crate::services::Services;

/// Returns one enrolled card to the factory key and deletes its record.
///
/// Taps of other cards are ignored; the reader keeps scanning until the
/// right card shows up or the reset is cancelled.
#[derive(Debug)]
pub struct ResetCard {
    card: CardRecord,
    user: User,
    waiting_for_key_change: bool,
    scanning: bool,
}

impl ResetCard {
    pub fn new(card: CardRecord, user: User) -> Self {
        Self {
            card,
            user,
            waiting_for_key_change: false,
            scanning: false,
        }
    }

    pub fn card(&self) -> &CardRecord {
        &self.card
    }

    async fn disable_scanning<S: Services>(&mut self, ctx: &ReaderContext<S>) -> GatewayResult<()> {
        if self.scanning {
            self.scanning = false;
            ctx.disable_card_checking().await?;
        }
        Ok(())
    }

    async fn on_tap<S: Services>(&mut self, ctx: &ReaderContext<S>, message: Message) -> GatewayResult<Transition> {
        let tap: NfcTap = message.payload_as()?;
        if self.waiting_for_key_change {
            return Ok(Transition::Stay);
        }
        if tap.card_uid != self.card.uid {
            warn!(
                connection_id = %ctx.id(),
                expected = %self.card.uid,
                tapped = %tap.card_uid,
                "tapped card is not the one to reset"
            );
            return Ok(Transition::Stay);
        }

        self.disable_scanning(ctx).await?;

        let key = match ctx.services().cards().get_by_id(self.card.id).await {
            Ok(card) => card
                .and_then(|card| card.key(KeySlot::MASTER))
                .unwrap_or(Key128::FACTORY_DEFAULT),
            Err(e) => return self.abort(ctx, e.into()).await,
        };

        ctx.send_event(
            MessageType::NfcChangeKeys,
            &ChangeKeysRequest {
                key_number: KeySlot::MASTER,
                auth_key: key,
                old_key: key,
                new_key: Key128::FACTORY_DEFAULT,
            },
        )?;
        self.waiting_for_key_change = true;
        Ok(Transition::Stay)
    }

    /// Fatal errors close the connection; anything else ends the reset on
    /// the error screen.
    async fn abort<S: Services>(
        &mut self,
        ctx: &ReaderContext<S>,
        error: GatewayError,
    ) -> GatewayResult<Transition> {
        if error.is_fatal() {
            return Err(error);
        }
        warn!(connection_id = %ctx.id(), card_id = %self.card.id, error = %error, "card reset failed");
        self.waiting_for_key_change = false;
        ctx.flash_error(MSG_RESET_FAILED).await?;
        Ok(Transition::to(IdleDispatch))
    }
}

impl StateHandler for ResetCard {
    fn kind(&self) -> StateKind {
        StateKind::ResetCard
    }

    async fn on_enter<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<Transition> {
        ctx.enable_card_checking(&CardChecking::ResetNfcCard {
            card: CardRef { id: self.card.id },
            user: UserSummary::from(&self.user),
        })
        .await?;
        self.scanning = true;
        self.waiting_for_key_change = false;
        Ok(Transition::Stay)
    }

    async fn on_exit<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<()> {
        self.waiting_for_key_change = false;
        self.disable_scanning(ctx).await
    }

    async fn on_event<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        match message.message_type() {
            Some(MessageType::NfcTap) => self.on_tap(ctx, message).await,
            Some(MessageType::Cancel) => {
                debug!(connection_id = %ctx.id(), "card reset cancelled by reader");
                Ok(Transition::to(IdleDispatch))
            }
            _ => Err(unexpected(self.kind(), &message)),
        }
    }

    async fn on_response<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        self.waiting_for_key_change = false;

        let response: ChangeKeysResponse = message.payload_as().unwrap_or_default();
        if !response.is_confirmed() {
            warn!(
                connection_id = %ctx.id(),
                card_id = %self.card.id,
                failed_keys = ?response.failed_keys,
                "key reset failed, card record kept"
            );
            return Ok(Transition::to(IdleDispatch));
        }

        if let Err(e) = ctx.services().cards().delete(self.card.id).await {
            return self.abort(ctx, e.into()).await;
        }
        info!(connection_id = %ctx.id(), card_id = %self.card.id, user_id = %self.user.id, "card reset");

        ctx.flash_success(MSG_CARD_ERASED).await?;
        Ok(Transition::to(IdleDispatch))
    }

    fn expected_response(&self) -> Option<MessageType> {
        self.waiting_for_key_change
            .then_some(MessageType::NfcChangeKeys)
    }
}
