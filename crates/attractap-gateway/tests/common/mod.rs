//! Shared helpers for the gateway integration tests.
//!
//! [`FakeDevice`] plays a reader on the far end of an in-memory duplex
//! stream, speaking the real frame codec. A background task reads
//! everything the gateway sends, acknowledges card checking toggles the
//! way reader firmware does, and queues the rest for the test.
//!
//! Tests run with `start_paused = true`, so feedback delays and idle
//! timeouts elapse instantly while the order of events stays exact.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use attractap_core::services::ReaderStore;
use attractap_core::{FirmwareDescriptor, NewReader, ReaderIdentity, ReaderUpdate, Resource};
use attractap_gateway::credentials::{generate_token, hash_token_with};
use attractap_gateway::memory::InMemoryServices;
use attractap_gateway::{Gateway, GatewayConfig};
use attractap_protocol::payloads::AuthenticateRequest;
use attractap_protocol::{Envelope, Frame, Message, MessageKind, MessageType, ReaderCodec};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::DuplexStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

type DeviceSink = SplitSink<Framed<DuplexStream, ReaderCodec>, Frame>;

/// Something the gateway sent to the device
#[derive(Debug, Clone)]
pub enum Received {
    Message(Message),
    Heartbeat,
    Binary(Bytes),
}

pub struct FakeDevice {
    sink: Arc<Mutex<DeviceSink>>,
    inbox: mpsc::UnboundedReceiver<Received>,
    auto_ack: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl FakeDevice {
    pub fn new(stream: DuplexStream) -> Self {
        let (sink, mut frames) = Framed::new(stream, ReaderCodec::new()).split();
        let sink = Arc::new(Mutex::new(sink));
        let auto_ack = Arc::new(AtomicBool::new(true));
        let (tx, inbox) = mpsc::unbounded_channel();

        let reader = tokio::spawn({
            let sink = sink.clone();
            let auto_ack = auto_ack.clone();
            async move {
                while let Some(Ok(frame)) = frames.next().await {
                    let received = match frame {
                        Frame::Binary(data) => Received::Binary(data),
                        Frame::Text(text) => match Envelope::from_json(&text).unwrap() {
                            Envelope::Heartbeat => Received::Heartbeat,
                            Envelope::Message(message) => {
                                if auto_ack.load(Ordering::SeqCst) && needs_ack(&message) {
                                    let ack = Message::ack(message.message_type().unwrap().clone());
                                    let frame = Frame::try_from(&Envelope::Message(ack)).unwrap();
                                    let _ = sink.lock().await.send(frame).await;
                                }
                                Received::Message(message)
                            }
                        },
                    };
                    if tx.send(received).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            sink,
            inbox,
            auto_ack,
            reader,
        }
    }

    /// Stop acknowledging card checking toggles.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.auto_ack.store(enabled, Ordering::SeqCst);
    }

    pub async fn send(&self, message: Message) {
        self.send_envelope(Envelope::Message(message)).await;
    }

    pub async fn send_envelope(&self, envelope: Envelope) {
        let frame = Frame::try_from(&envelope).unwrap();
        self.sink.lock().await.send(frame).await.unwrap();
    }

    pub async fn send_raw(&self, frame: Frame) {
        self.sink.lock().await.send(frame).await.unwrap();
    }

    pub async fn event<P: Serialize>(&self, ty: MessageType, payload: &P) {
        self.send(Message::typed_event(ty, payload).unwrap()).await;
    }

    pub async fn respond<P: Serialize>(&self, ty: MessageType, payload: &P) {
        self.send(Message::typed_response(ty, payload).unwrap()).await;
    }

    pub async fn heartbeat(&self) {
        self.send_envelope(Envelope::Heartbeat).await;
    }

    /// Next item from the gateway, `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Received> {
        self.inbox.recv().await
    }

    /// Next structured message, skipping heartbeats.
    pub async fn next_message(&mut self) -> Message {
        loop {
            match self.recv().await {
                Some(Received::Message(message)) => return message,
                Some(Received::Heartbeat) => continue,
                Some(Received::Binary(data)) => panic!("expected a message, got {} binary bytes", data.len()),
                None => panic!("connection closed while waiting for a message"),
            }
        }
    }

    /// Next structured message, which must be of type `ty`.
    pub async fn expect(&mut self, ty: MessageType) -> Message {
        let message = self.next_message().await;
        assert!(
            message.is(&ty),
            "expected {ty}, got {} {}: {}",
            message.kind,
            message.tag,
            message.payload
        );
        message
    }

    pub async fn expect_event(&mut self, ty: MessageType) -> Message {
        let message = self.expect(ty).await;
        assert_eq!(message.kind, MessageKind::Event);
        message
    }

    pub async fn expect_response(&mut self, ty: MessageType) -> Message {
        let message = self.expect(ty).await;
        assert_eq!(message.kind, MessageKind::Response);
        message
    }

    /// Expect `display` carrying `text`, followed by `clear`.
    pub async fn expect_flash(&mut self, display: MessageType, clear: MessageType, text: &str) {
        let shown = self.expect_event(display).await;
        assert_eq!(shown.payload["message"], text);
        self.expect_event(clear).await;
    }

    pub async fn expect_binary(&mut self) -> Bytes {
        match self.recv().await {
            Some(Received::Binary(data)) => data,
            other => panic!("expected a binary frame, got {other:?}"),
        }
    }

    /// Assert the gateway sends nothing for `duration`.
    pub async fn assert_quiet(&mut self, duration: Duration) {
        if let Ok(received) = tokio::time::timeout(duration, self.recv()).await {
            panic!("expected silence, got {received:?}");
        }
    }

    /// Wait for the gateway to drop the connection.
    pub async fn expect_closed(&mut self) {
        while let Some(received) = self.recv().await {
            if let Received::Message(message) = received {
                assert!(
                    !message.is(&MessageType::NfcTap),
                    "unexpected message before close: {}",
                    message.tag
                );
            }
        }
    }

    /// Close the device side of the stream.
    pub async fn disconnect(self) {
        let _ = self.sink.lock().await.close().await;
        self.reader.abort();
    }
}

fn needs_ack(message: &Message) -> bool {
    message.kind == MessageKind::Event
        && (message.is(&MessageType::NfcEnableCardChecking)
            || message.is(&MessageType::NfcDisableCardChecking))
}

/// Gateway configuration for tests: cheap key derivation, no liveness timeout.
pub fn test_config() -> GatewayConfig {
    GatewayConfig::default()
        .key_derivation_iterations(10)
        .liveness_timeout(None)
}

pub fn firmware(version: &str) -> FirmwareDescriptor {
    FirmwareDescriptor {
        name: "attractap".into(),
        variant: "esp32c3".into(),
        version: version.into(),
    }
}

pub struct Harness {
    pub gateway: Gateway<InMemoryServices>,
    pub services: Arc<InMemoryServices>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let services = InMemoryServices::new();
        let gateway = Gateway::new(services.clone(), config);
        Self { gateway, services }
    }

    /// Open a new connection to the gateway.
    pub fn connect(&self) -> FakeDevice {
        let (device, server) = tokio::io::duplex(256 * 1024);
        let gateway = self.gateway.clone();
        tokio::spawn(async move { gateway.serve(server, None).await });
        FakeDevice::new(device)
    }

    /// Create a reader with known credentials and the given resources.
    pub async fn provision_reader(&self, resources: &[&str]) -> (ReaderIdentity, String) {
        let token = generate_token();
        let readers = &self.services.readers;

        let reader = readers
            .create_new(NewReader {
                name: "T3ST".into(),
                api_token_hash: hash_token_with(&token, b"fixed test salt!", 1),
                firmware: Some(firmware("1.0.0")),
            })
            .await
            .unwrap();

        let resource_ids = resources
            .iter()
            .map(|name| readers.add_resource(name).id)
            .collect();
        let reader = readers
            .update(reader.id, ReaderUpdate::new().resource_ids(resource_ids))
            .await
            .unwrap();

        (reader, token)
    }

    /// Connect and authenticate a fresh reader bound to `resources`.
    ///
    /// Returns once the gateway has asked for the firmware info and got
    /// the answer; the next message is the first one of the working state.
    pub async fn connect_reader(&self, resources: &[&str]) -> (FakeDevice, ReaderIdentity) {
        let (reader, token) = self.provision_reader(resources).await;
        let mut device = self.connect();
        authenticate(&mut device, &reader, &token, firmware("1.0.0")).await;
        (device, reader)
    }
}

pub async fn authenticate(
    device: &mut FakeDevice,
    reader: &ReaderIdentity,
    token: &str,
    reported: FirmwareDescriptor,
) {
    device
        .event(
            MessageType::ReaderAuthenticate,
            &AuthenticateRequest {
                id: reader.id,
                token: token.to_string(),
            },
        )
        .await;

    let authenticated = device.expect_response(MessageType::ReaderAuthenticated).await;
    assert_eq!(authenticated.payload["name"], reader.name.as_str());

    device.expect_event(MessageType::ReaderFirmwareInfo).await;
    device.respond(MessageType::ReaderFirmwareInfo, &reported).await;
}

/// The only resource of a single-resource reader.
pub fn only_resource(reader: &ReaderIdentity) -> Resource {
    assert_eq!(reader.resources.len(), 1);
    reader.resources[0].clone()
}
