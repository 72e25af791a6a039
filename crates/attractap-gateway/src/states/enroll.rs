//! Card enrollment for one user.
//!
//! The tapped card is re-keyed with a key derived from the user's seed,
//! authenticated once with that key and only then recorded. Any failure
//! after the tap ends on the error screen.

use std::collections::BTreeMap;

use attractap_core::constants::{MSG_ENROLLMENT_FAILED, MSG_ENROLLMENT_SUCCESSFUL};
use attractap_core::services::{CardStore, UserDirectory};
use attractap_core::{CardUid, Key128, KeySlot, NewCard, User};
use attractap_protocol::payloads::{
    AuthenticateCardRequest, AuthenticateCardResponse, CardChecking, ChangeKeysRequest,
    ChangeKeysResponse, NfcTap, UserSummary,
};
use attractap_protocol::{Message, MessageType};
use tracing::{debug, info, warn};

use super::{IdleDispatch, unexpected};
use crate::context::ReaderContext;
use crate::error::{GatewayError, GatewayResult};
use crate::machine::{StateHandler, StateKind, Transition};
use crate::provisioning::{derive_card_key_blocking, generate_key_seed};
use crate::services::Services;

#[derive(Debug, Default)]
enum EnrollPhase {
    #[default]
    Idle,
    WaitForTap,
    WaitForKeyChange {
        uid: CardUid,
        key: Key128,
    },
    WaitForAuthentication {
        uid: CardUid,
        key: Key128,
    },
}

/// Provisions a tapped card with a key derived for `user` and records it.
///
/// A card that already carries a derived key is re-keyed with its stored
/// key, a blank card with the factory default.
#[derive(Debug)]
pub struct EnrollCard {
    user: User,
    phase: EnrollPhase,
    scanning: bool,
}

impl EnrollCard {
    pub fn new(user: User) -> Self {
        Self {
            user,
            phase: EnrollPhase::Idle,
            scanning: false,
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    async fn disable_scanning<S: Services>(&mut self, ctx: &ReaderContext<S>) -> GatewayResult<()> {
        if self.scanning {
            self.scanning = false;
            ctx.disable_card_checking().await?;
        }
        Ok(())
    }

    async fn on_tap<S: Services>(&mut self, ctx: &ReaderContext<S>, message: Message) -> GatewayResult<Transition> {
        if !matches!(self.phase, EnrollPhase::WaitForTap) {
            debug!(connection_id = %ctx.id(), "ignoring tap during key change");
            return Ok(Transition::Stay);
        }

        let tap: NfcTap = message.payload_as()?;
        self.disable_scanning(ctx).await?;

        match self.change_keys(ctx, tap.card_uid).await {
            Ok(()) => Ok(Transition::Stay),
            Err(e) => self.abort(ctx, e).await,
        }
    }

    async fn change_keys<S: Services>(&mut self, ctx: &ReaderContext<S>, uid: CardUid) -> GatewayResult<()> {
        let services = ctx.services();
        let current = services
            .cards()
            .get_by_uid(&uid)
            .await?
            .and_then(|card| card.key(KeySlot::MASTER))
            .unwrap_or(Key128::FACTORY_DEFAULT);

        let seed = services
            .users()
            .ensure_key_seed(self.user.id, generate_key_seed())
            .await?;
        let key = derive_card_key_blocking(
            seed,
            KeySlot::MASTER,
            uid.clone(),
            ctx.config().key_derivation_iterations,
        )
        .await?;

        debug!(connection_id = %ctx.id(), card_uid = %uid, factory_key = current.is_factory_default(), "changing card key");
        ctx.send_event(
            MessageType::NfcChangeKeys,
            &ChangeKeysRequest {
                key_number: KeySlot::MASTER,
                auth_key: current,
                old_key: current,
                new_key: key,
            },
        )?;
        self.phase = EnrollPhase::WaitForKeyChange { uid, key };
        Ok(())
    }

    /// Fatal errors close the connection; anything else ends the enrollment
    /// on the error screen.
    async fn abort<S: Services>(
        &mut self,
        ctx: &ReaderContext<S>,
        error: GatewayError,
    ) -> GatewayResult<Transition> {
        if error.is_fatal() {
            return Err(error);
        }
        warn!(connection_id = %ctx.id(), user_id = %self.user.id, error = %error, "enrollment failed");
        self.phase = EnrollPhase::Idle;
        ctx.flash_error(MSG_ENROLLMENT_FAILED).await?;
        Ok(Transition::to(IdleDispatch))
    }

    async fn record_card<S: Services>(&self, ctx: &ReaderContext<S>, uid: CardUid, key: Key128) -> GatewayResult<()> {
        let services = ctx.services();
        let owner = services
            .users()
            .find_one(self.user.id)
            .await?
            .ok_or(GatewayError::UserNotFound(self.user.id))?;

        if let Some(stale) = services.cards().get_by_uid(&uid).await? {
            debug!(connection_id = %ctx.id(), card_id = %stale.id, "replacing stale card record");
            services.cards().delete(stale.id).await?;
        }

        let card = services
            .cards()
            .create(NewCard {
                uid,
                keys: BTreeMap::from([(KeySlot::MASTER, key)]),
                owner: owner.id,
            })
            .await?;

        info!(connection_id = %ctx.id(), card_id = %card.id, user_id = %owner.id, "card enrolled");
        Ok(())
    }
}

impl StateHandler for EnrollCard {
    fn kind(&self) -> StateKind {
        StateKind::EnrollCard
    }

    async fn on_enter<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<Transition> {
        ctx.enable_card_checking(&CardChecking::EnrollNfcCard {
            user: UserSummary::from(&self.user),
        })
        .await?;
        self.scanning = true;
        self.phase = EnrollPhase::WaitForTap;
        Ok(Transition::Stay)
    }

    async fn on_exit<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<()> {
        self.phase = EnrollPhase::Idle;
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
                debug!(connection_id = %ctx.id(), "enrollment cancelled by reader");
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
        match std::mem::take(&mut self.phase) {
            EnrollPhase::WaitForKeyChange { uid, key } => {
                let response: ChangeKeysResponse = message.payload_as().unwrap_or_default();
                if !response.is_confirmed() {
                    warn!(
                        connection_id = %ctx.id(),
                        card_uid = %uid,
                        failed_keys = ?response.failed_keys,
                        "key change failed, enrollment aborted"
                    );
                    return Ok(Transition::to(IdleDispatch));
                }

                ctx.send_event(
                    MessageType::NfcAuthenticate,
                    &AuthenticateCardRequest {
                        key_number: KeySlot::MASTER,
                        authentication_key: key,
                    },
                )?;
                self.phase = EnrollPhase::WaitForAuthentication { uid, key };
                Ok(Transition::Stay)
            }
            EnrollPhase::WaitForAuthentication { uid, key } => {
                let response: AuthenticateCardResponse = message.payload_as().unwrap_or_default();
                if !response.authentication_successful {
                    warn!(connection_id = %ctx.id(), card_uid = %uid, "new card key does not authenticate");
                    ctx.flash_error(MSG_ENROLLMENT_FAILED).await?;
                    return Ok(Transition::to(IdleDispatch));
                }

                if let Err(e) = self.record_card(ctx, uid, key).await {
                    return self.abort(ctx, e).await;
                }

                ctx.flash_success(MSG_ENROLLMENT_SUCCESSFUL).await?;
                Ok(Transition::to(IdleDispatch))
            }
            phase => {
                self.phase = phase;
                Ok(Transition::Stay)
            }
        }
    }

    fn expected_response(&self) -> Option<MessageType> {
        match self.phase {
            EnrollPhase::WaitForKeyChange { .. } => Some(MessageType::NfcChangeKeys),
            EnrollPhase::WaitForAuthentication { .. } => Some(MessageType::NfcAuthenticate),
            _ => None,
        }
    }
}
