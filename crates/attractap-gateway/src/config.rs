use std::time::Duration;

use attractap_core::constants::{
    DEFAULT_ACK_ATTEMPTS, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_FIRMWARE_CHUNK_SIZE,
    DEFAULT_KEY_DERIVATION_ITERATIONS, DEFAULT_LIVENESS_TIMEOUT_MS, DEFAULT_MAX_FRAME_SIZE,
    INVALID_CARD_FEEDBACK_MS, RESOURCE_SELECTION_TAP_TIMEOUT_MS, SUCCESS_FEEDBACK_MS,
};

use crate::connection::AckPolicy;

/// Tunables of the reader gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long to wait for one acknowledgement
    pub ack_timeout: Duration,

    /// Transmissions per acknowledged send, first one included
    pub ack_attempts: u32,

    /// How long an error screen stays up
    pub error_feedback: Duration,

    /// How long a success screen stays up
    pub success_feedback: Duration,

    /// Tap timeout after a resource was picked from a selection list
    pub selection_tap_timeout: Duration,

    /// Close connections silent for this long. `None` keeps them forever.
    pub liveness_timeout: Option<Duration>,

    /// Size of one firmware chunk in bytes
    pub firmware_chunk_size: usize,

    /// PBKDF2 iterations for card key derivation
    pub key_derivation_iterations: u32,

    /// Largest accepted frame payload
    pub max_frame_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            ack_attempts: DEFAULT_ACK_ATTEMPTS,
            error_feedback: Duration::from_millis(INVALID_CARD_FEEDBACK_MS),
            success_feedback: Duration::from_millis(SUCCESS_FEEDBACK_MS),
            selection_tap_timeout: Duration::from_millis(RESOURCE_SELECTION_TAP_TIMEOUT_MS),
            liveness_timeout: Some(Duration::from_millis(DEFAULT_LIVENESS_TIMEOUT_MS)),
            firmware_chunk_size: DEFAULT_FIRMWARE_CHUNK_SIZE,
            key_derivation_iterations: DEFAULT_KEY_DERIVATION_ITERATIONS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-attempt acknowledgement timeout
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the number of transmissions per acknowledged send (at least one)
    pub fn ack_attempts(mut self, attempts: u32) -> Self {
        self.ack_attempts = attempts.max(1);
        self
    }

    pub fn error_feedback(mut self, delay: Duration) -> Self {
        self.error_feedback = delay;
        self
    }

    pub fn success_feedback(mut self, delay: Duration) -> Self {
        self.success_feedback = delay;
        self
    }

    pub fn selection_tap_timeout(mut self, timeout: Duration) -> Self {
        self.selection_tap_timeout = timeout;
        self
    }

    pub fn liveness_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Set the firmware chunk size (at least one byte)
    pub fn firmware_chunk_size(mut self, size: usize) -> Self {
        self.firmware_chunk_size = size.max(1);
        self
    }

    /// Set the PBKDF2 iteration count (at least one)
    pub fn key_derivation_iterations(mut self, iterations: u32) -> Self {
        self.key_derivation_iterations = iterations.max(1);
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub(crate) fn ack_policy(&self) -> AckPolicy {
        AckPolicy {
            timeout: self.ack_timeout,
            attempts: self.ack_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();

        assert_eq!(config.ack_timeout, Duration::from_secs(4));
        assert_eq!(config.ack_attempts, 3);
        assert_eq!(config.error_feedback, Duration::from_secs(5));
        assert_eq!(config.success_feedback, Duration::from_secs(10));
        assert_eq!(config.selection_tap_timeout, Duration::from_secs(30));
        assert_eq!(config.liveness_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.firmware_chunk_size, 8 * 1024);
        assert_eq!(config.key_derivation_iterations, 100_000);
    }

    #[test]
    fn test_builder_clamps_degenerate_values() {
        let config = GatewayConfig::new()
            .ack_attempts(0)
            .firmware_chunk_size(0)
            .key_derivation_iterations(0)
            .liveness_timeout(None);

        assert_eq!(config.ack_attempts, 1);
        assert_eq!(config.firmware_chunk_size, 1);
        assert_eq!(config.key_derivation_iterations, 1);
        assert!(config.liveness_timeout.is_none());
    }
}
