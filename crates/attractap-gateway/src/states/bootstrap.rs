//! First state of every connection.

use attractap_core::constants::MSG_PLEASE_REREGISTER;
use attractap_core::services::ReaderStore;
use attractap_core::{FirmwareDescriptor, NewReader, ReaderIdentity, ReaderUpdate};
use attractap_protocol::payloads::{
    AuthenticateRequest, AuthenticatedResponse, RegisterRequest, RegisterResponse, Unauthorized,
};
use attractap_protocol::{Message, MessageType};
use tracing::{debug, info, warn};

use super::{IdleDispatch, unexpected};
use crate::context::ReaderContext;
use crate::credentials::{generate_reader_name, generate_token, hash_token, verify_token};
use crate::error::{GatewayError, GatewayResult};
use crate::machine::{StateHandler, StateKind, Transition};
use crate::services::Services;

/// Registration and authentication.
///
/// An unbound connection only accepts `READER_REGISTER` and
/// `READER_AUTHENTICATE`. A connection that is already bound (entered
/// again after a restart) re-reads its reader instead; a reader that was
/// deleted in the meantime loses its binding and is asked to
/// authenticate again.
#[derive(Debug, Default)]
pub struct Bootstrap {
    awaiting_firmware_info: bool,
}

impl Bootstrap {
    async fn register<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        let request: RegisterRequest = message.payload_as()?;
        let token = generate_token();

        let reader = ctx
            .services()
            .readers()
            .create_new(NewReader {
                name: generate_reader_name(),
                api_token_hash: hash_token(&token),
                firmware: request.firmware,
            })
            .await?;

        info!(connection_id = %ctx.id(), reader_id = %reader.id, name = %reader.name, "registered new reader");
        ctx.send(Message::typed_response(
            MessageType::ReaderRegister,
            &RegisterResponse {
                id: reader.id,
                token,
            },
        )?)?;

        Ok(Transition::Stay)
    }

    async fn authenticate<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        let request: AuthenticateRequest = message.payload_as()?;

        match verify(ctx, &request).await {
            Ok(reader) => {
                ctx.services().readers().update_last_connection(reader.id).await?;
                info!(connection_id = %ctx.id(), reader_id = %reader.id, "reader authenticated");
                self.authenticated(ctx, reader)
            }
            Err(e @ (GatewayError::UnknownReader(_) | GatewayError::InvalidToken(_))) => {
                warn!(connection_id = %ctx.id(), reader_id = %request.id, error = %e, "authentication rejected");
                ctx.send_event(
                    MessageType::ReaderUnauthorized,
                    &Unauthorized {
                        message: MSG_PLEASE_REREGISTER.to_string(),
                    },
                )?;
                Ok(Transition::Stay)
            }
            Err(e) => Err(e),
        }
    }

    /// Bind the reader, confirm authentication and ask for its firmware.
    fn authenticated<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        reader: ReaderIdentity,
    ) -> GatewayResult<Transition> {
        let name = reader.name.clone();
        ctx.bind(reader);

        ctx.send(Message::typed_response(
            MessageType::ReaderAuthenticated,
            &AuthenticatedResponse { name },
        )?)?;
        ctx.send(Message::bare_event(MessageType::ReaderFirmwareInfo))?;
        self.awaiting_firmware_info = true;

        Ok(Transition::Stay)
    }
}

async fn verify<S: Services>(
    ctx: &ReaderContext<S>,
    request: &AuthenticateRequest,
) -> GatewayResult<ReaderIdentity> {
    let reader = ctx
        .services()
        .readers()
        .find_by_id(request.id)
        .await?
        .ok_or(GatewayError::UnknownReader(request.id))?;

    if !verify_token(&request.token, &reader.api_token_hash) {
        return Err(GatewayError::InvalidToken(request.id));
    }
    Ok(reader)
}

impl StateHandler for Bootstrap {
    fn kind(&self) -> StateKind {
        StateKind::Bootstrap
    }

    async fn on_enter<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<Transition> {
        self.awaiting_firmware_info = false;

        let Some(reader_id) = ctx.reader().map(|reader| reader.id) else {
            return Ok(Transition::Stay);
        };

        match ctx.services().readers().find_by_id(reader_id).await? {
            Some(reader) => self.authenticated(ctx, reader),
            None => {
                info!(connection_id = %ctx.id(), reader_id = %reader_id, "bound reader no longer exists");
                ctx.unbind();
                ctx.send(Message::bare_event(MessageType::ReaderRequestAuthentication))?;
                Ok(Transition::Stay)
            }
        }
    }

    async fn on_event<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        match message.message_type() {
            Some(MessageType::ReaderRegister) => self.register(ctx, message).await,
            Some(MessageType::ReaderAuthenticate) => self.authenticate(ctx, message).await,
            _ => Err(unexpected(self.kind(), &message)),
        }
    }

    async fn on_response<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        let reader_id = ctx.require_reader()?.id;
        self.awaiting_firmware_info = false;

        match message.payload_as::<FirmwareDescriptor>() {
            Ok(firmware) => {
                debug!(connection_id = %ctx.id(), reader_id = %reader_id, firmware = %firmware, "reader reported firmware");
                let reader = ctx
                    .services()
                    .readers()
                    .update(reader_id, ReaderUpdate::new().firmware(firmware))
                    .await?;
                ctx.bind(reader);
            }
            Err(e) => {
                warn!(connection_id = %ctx.id(), reader_id = %reader_id, error = %e, "ignoring firmware info");
            }
        }

        Ok(Transition::to(IdleDispatch))
    }

    fn expected_response(&self) -> Option<MessageType> {
        self.awaiting_firmware_info
            .then_some(MessageType::ReaderFirmwareInfo)
    }
}
