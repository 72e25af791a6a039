//! Core constants for the Attractap reader protocol.
//!
//! This module centralizes the timing, framing and provisioning constants
//! used by the reader gateway. Values that operators may want to tune are
//! exposed again through `GatewayConfig`; the constants here are the
//! defaults and the protocol-fixed values.
//!
//! # Message Envelope
//!
//! Every structured frame carries one JSON envelope:
//!
//! ```text
//! {"event": "EVENT" | "RESPONSE" | "HEARTBEAT",
//!  "data":  {"type": "NFC_TAP", "payload": {...}, "auth": {...}?}}
//! ```
//!
//! Acknowledgements are responses whose type carries the [`ACK_PREFIX`]
//! in front of the acknowledged message type.
//!
//! # Usage
//!
//! ```
//! use attractap_core::constants::*;
//! use std::time::Duration;
//!
//! let ack_budget = Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS) * DEFAULT_ACK_ATTEMPTS;
//! assert_eq!(ack_budget, Duration::from_secs(12));
//! assert_eq!(NTAG424_KEY_LENGTH, 16);
//! ```

// ============================================================================
// Envelope
// ============================================================================

/// Prefix of a response type that acknowledges a previously sent message.
///
/// A device acknowledging `NFC_ENABLE_CARD_CHECKING` replies with a
/// `RESPONSE` of type `ACK_NFC_ENABLE_CARD_CHECKING`.
///
/// # Examples
///
/// ```
/// use attractap_core::constants::ACK_PREFIX;
///
/// let ack = format!("{ACK_PREFIX}NFC_TAP");
/// assert_eq!(ack, "ACK_NFC_TAP");
/// ```
pub const ACK_PREFIX: &str = "ACK_";

/// Envelope discriminator for device- or server-initiated messages.
pub const KIND_EVENT: &str = "EVENT";

/// Envelope discriminator for correlated replies.
pub const KIND_RESPONSE: &str = "RESPONSE";

/// Envelope discriminator for liveness messages.
pub const KIND_HEARTBEAT: &str = "HEARTBEAT";

// ============================================================================
// Framing
// ============================================================================

/// Frame kind byte for a UTF-8 JSON envelope.
pub const FRAME_KIND_TEXT: u8 = 0x01;

/// Frame kind byte for an opaque binary payload (firmware chunks).
pub const FRAME_KIND_BINARY: u8 = 0x02;

/// Bytes preceding every frame payload: one kind byte plus a big-endian u32 length.
pub const FRAME_HEADER_LENGTH: usize = 5;

/// Default maximum frame payload size in bytes (64 KB).
///
/// Large enough for the biggest firmware chunk plus envelope overhead,
/// small enough to bound memory per connection.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

// ============================================================================
// Reliability Layer
// ============================================================================

/// Default time to wait for an acknowledgement before retransmitting (milliseconds).
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 4_000;

/// Default number of transmissions of one logical send, first attempt included.
pub const DEFAULT_ACK_ATTEMPTS: u32 = 3;

/// Interval at which readers send heartbeats (milliseconds).
///
/// Informational: the gateway never schedules heartbeats itself, it only
/// echoes them.
pub const READER_HEARTBEAT_INTERVAL_MS: u64 = 25_000;

/// Default time without any inbound frame after which a connection is closed (milliseconds).
pub const DEFAULT_LIVENESS_TIMEOUT_MS: u64 = 60_000;

// ============================================================================
// User Feedback
// ============================================================================

/// How long an error screen stays visible before it is cleared (milliseconds).
pub const INVALID_CARD_FEEDBACK_MS: u64 = 5_000;

/// How long a success screen stays visible before it is cleared (milliseconds).
pub const SUCCESS_FEEDBACK_MS: u64 = 10_000;

/// Idle timeout for a tap after a resource was picked from a selection list (milliseconds).
pub const RESOURCE_SELECTION_TAP_TIMEOUT_MS: u64 = 30_000;

pub const MSG_DO_NOT_REMOVE_CARD: &str = "Do not remove card!";
pub const MSG_INVALID_CARD: &str = "Invalid card";
pub const MSG_NO_RESOURCES: &str = "No Resources";
pub const MSG_SELECT_RESOURCE: &str = "Select a resource";
pub const MSG_INVALID_RESOURCE: &str = "Invalid resource";
pub const MSG_UNKNOWN_RESOURCE: &str = "Unknown resource";
pub const MSG_RESOURCE_STARTED: &str = "Resource started";
pub const MSG_RESOURCE_STOPPED: &str = "Resource stopped";
pub const MSG_ENROLLMENT_SUCCESSFUL: &str = "Enrollment successful";
pub const MSG_ENROLLMENT_FAILED: &str = "Enrollment failed";
pub const MSG_CARD_ERASED: &str = "Card erased";
pub const MSG_RESET_FAILED: &str = "Reset failed";
pub const MSG_PLEASE_REREGISTER: &str = "PLEASE_REREGISTER";

// ============================================================================
// Card Provisioning
// ============================================================================

/// Length of an NTAG424 AES key in bytes.
pub const NTAG424_KEY_LENGTH: usize = 16;

/// Highest key slot an NTAG424 card exposes (slots 0 to 4).
pub const NTAG424_MAX_KEY_SLOT: u8 = 4;

/// Application master key slot, the only slot the gateway provisions.
pub const KEY_SLOT_MASTER: u8 = 0;

/// Default PBKDF2 iteration count for card key derivation.
pub const DEFAULT_KEY_DERIVATION_ITERATIONS: u32 = 100_000;

/// Length of a per-user key seed in bytes (hex encoded when stored).
pub const KEY_SEED_LENGTH: usize = 32;

/// Maximum accepted length of a card UID as reported by a reader.
///
/// NTAG424 UIDs are 7 bytes (14 hex characters); the limit leaves room
/// for other ISO 14443 card families.
pub const MAX_CARD_UID_LENGTH: usize = 32;

// ============================================================================
// Reader Credentials
// ============================================================================

/// Length of the access token handed to a reader on registration.
pub const READER_TOKEN_LENGTH: usize = 16;

/// Length of the random display name given to a freshly registered reader.
pub const READER_NAME_LENGTH: usize = 4;

/// PBKDF2 iteration count used when hashing reader access tokens.
pub const TOKEN_HASH_ITERATIONS: u32 = 10_000;

// ============================================================================
// Firmware Streaming
// ============================================================================

/// Default size of one firmware chunk in bytes (8 KB).
pub const DEFAULT_FIRMWARE_CHUNK_SIZE: usize = 8 * 1024;

// ============================================================================
// State Machine
// ============================================================================

/// Maximum number of state transitions kept per connection for diagnostics.
pub const MAX_TRANSITION_HISTORY: usize = 100;
