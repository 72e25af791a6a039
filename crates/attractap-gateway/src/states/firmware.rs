//! Firmware streaming to an outdated reader.

use std::sync::Arc;

use attractap_core::services::FirmwareCatalog;
use attractap_protocol::payloads::{FirmwareUpdateRequired, StreamChunk};
use attractap_protocol::{Message, MessageType};
use tracing::{debug, info, warn};

use super::{IdleDispatch, unexpected};
use crate::context::ReaderContext;
use crate::error::GatewayResult;
use crate::firmware::FirmwareImage;
use crate::machine::{StateHandler, StateKind, Transition};
use crate::services::Services;

/// Hands a newer firmware image to the reader chunk by chunk.
///
/// The reader pulls chunks with `READER_FIRMWARE_STREAM_CHUNK` (as an
/// event or a response, both are served) and reboots once it has all of
/// them, which ends the connection.
#[derive(Debug, Default)]
pub struct FirmwareUpdateStreaming {
    image: Option<Arc<FirmwareImage>>,
}

impl FirmwareUpdateStreaming {
    fn serve_chunk<S: Services>(&self, ctx: &ReaderContext<S>, message: &Message) -> GatewayResult<Transition> {
        let Some(image) = &self.image else {
            return Ok(Transition::Stay);
        };

        let request: StreamChunk = message.payload_as()?;
        match image.chunk(request.chunk_index) {
            Some(chunk) => {
                debug!(connection_id = %ctx.id(), chunk_index = request.chunk_index, len = chunk.len(), "sending firmware chunk");
                ctx.connection().send_binary(chunk.clone())?;
            }
            None => {
                warn!(
                    connection_id = %ctx.id(),
                    chunk_index = request.chunk_index,
                    chunks = image.chunk_count(),
                    "firmware chunk out of range"
                );
            }
        }
        Ok(Transition::Stay)
    }
}

impl StateHandler for FirmwareUpdateStreaming {
    fn kind(&self) -> StateKind {
        StateKind::FirmwareUpdateStreaming
    }

    async fn on_enter<S: Services>(&mut self, ctx: &mut ReaderContext<S>) -> GatewayResult<Transition> {
        let reader = ctx.require_reader()?;
        let reader_id = reader.id;
        let Some(current) = reader.firmware.clone() else {
            return Ok(Transition::to(IdleDispatch));
        };

        let Some(definition) = ctx
            .services()
            .firmware()
            .get_definition(&current.name, &current.variant)
            .await?
        else {
            warn!(connection_id = %ctx.id(), firmware = %current, "no firmware available for variant");
            return Ok(Transition::to(IdleDispatch));
        };

        let image = ctx
            .firmware_cache()
            .get_or_load(ctx.services().firmware(), &definition)
            .await?;

        info!(
            connection_id = %ctx.id(),
            reader_id = %reader_id,
            current = %current,
            available = %definition.version,
            chunks = image.chunk_count(),
            "requesting firmware update"
        );
        ctx.send_event(
            MessageType::ReaderFirmwareUpdateRequired,
            &FirmwareUpdateRequired {
                current,
                available: definition,
                firmware: image.layout(),
            },
        )?;
        self.image = Some(image);

        Ok(Transition::Stay)
    }

    async fn on_exit<S: Services>(&mut self, _ctx: &mut ReaderContext<S>) -> GatewayResult<()> {
        self.image = None;
        Ok(())
    }

    async fn on_event<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        if !message.is(&MessageType::ReaderFirmwareStreamChunk) {
            return Err(unexpected(self.kind(), &message));
        }
        self.serve_chunk(ctx, &message)
    }

    async fn on_response<S: Services>(
        &mut self,
        ctx: &mut ReaderContext<S>,
        message: Message,
    ) -> GatewayResult<Transition> {
        self.serve_chunk(ctx, &message)
    }

    fn expected_response(&self) -> Option<MessageType> {
        self.image
            .is_some()
            .then_some(MessageType::ReaderFirmwareStreamChunk)
    }
}
