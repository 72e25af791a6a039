//! Integration tests for firmware update streaming
//!
//! Run with: cargo test --package attractap-gateway --test firmware_update

mod common;

use std::time::Duration;

use attractap_core::FirmwareDefinition;
use attractap_protocol::MessageType;
use bytes::Bytes;
use common::{Harness, firmware, test_config};
use serde_json::json;

fn definition(version: &str) -> FirmwareDefinition {
    FirmwareDefinition {
        name: "attractap".into(),
        friendly_name: "Attractap".into(),
        variant: "esp32c3".into(),
        variant_friendly_name: "ESP32-C3".into(),
        version: version.into(),
        filename: format!("attractap-esp32c3-{version}.bin"),
    }
}

fn binary() -> Bytes {
    (0..20_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
}

fn harness_with_release(version: &str) -> Harness {
    let h = Harness::with_config(test_config().firmware_chunk_size(8192));
    h.services.firmware.publish(definition(version), binary());
    h
}

#[tokio::test(start_paused = true)]
async fn test_outdated_firmware_is_streamed() {
    let h = harness_with_release("2.0.0");
    let (mut device, _reader) = h.connect_reader(&["Laser"]).await;

    let announce = device
        .expect_event(MessageType::ReaderFirmwareUpdateRequired)
        .await;
    assert_eq!(announce.payload["current"]["version"], "1.0.0");
    assert_eq!(announce.payload["available"]["version"], "2.0.0");
    assert_eq!(announce.payload["available"]["friendlyName"], "Attractap");
    assert_eq!(announce.payload["firmware"]["chunks"], 3);
    assert_eq!(announce.payload["firmware"]["size"], 20_000);
    assert_eq!(announce.payload["firmware"]["chunkSize"], 8192);

    let image = binary();

    device
        .event(MessageType::ReaderFirmwareStreamChunk, &json!({"chunkIndex": 0}))
        .await;
    assert_eq!(device.expect_binary().await, image.slice(..8192));

    // Requests may also arrive as responses
    device
        .respond(MessageType::ReaderFirmwareStreamChunk, &json!({"chunkIndex": 2}))
        .await;
    assert_eq!(device.expect_binary().await, image.slice(16_384..));

    device
        .event(MessageType::ReaderFirmwareStreamChunk, &json!({"chunkIndex": 3}))
        .await;
    device.assert_quiet(Duration::from_secs(1)).await;

    device
        .event(MessageType::ReaderFirmwareStreamChunk, &json!({"chunkIndex": 1}))
        .await;
    assert_eq!(device.expect_binary().await, image.slice(8192..16_384));
}

#[tokio::test(start_paused = true)]
async fn test_firmware_image_loaded_once() {
    let h = harness_with_release("2.0.0");

    let (mut first, _) = h.connect_reader(&["Laser"]).await;
    first
        .expect_event(MessageType::ReaderFirmwareUpdateRequired)
        .await;
    let (mut second, _) = h.connect_reader(&["Lathe"]).await;
    second
        .expect_event(MessageType::ReaderFirmwareUpdateRequired)
        .await;

    assert_eq!(h.services.firmware.stream_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_current_firmware_skips_update() {
    let h = harness_with_release("1.0.0");
    let (mut device, _reader) = h.connect_reader(&["Laser"]).await;

    device.expect_event(MessageType::NfcEnableCardChecking).await;
    assert_eq!(h.services.firmware.stream_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_variant_skips_update() {
    let h = harness_with_release("2.0.0");
    let (reader, token) = h.provision_reader(&["Laser"]).await;
    let mut device = h.connect();

    let mut reported = firmware("0.9.0");
    reported.variant = "esp32s3".into();
    common::authenticate(&mut device, &reader, &token, reported).await;

    device.expect_event(MessageType::NfcEnableCardChecking).await;
}
