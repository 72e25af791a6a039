use attractap_core::{CardId, ReaderId, UserId};
use thiserror::Error;

use crate::machine::StateKind;

/// Lifecycle hook that failed during a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Enter,
    Exit,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LifecyclePhase::Enter => write!(f, "enter"),
            LifecyclePhase::Exit => write!(f, "exit"),
        }
    }
}

/// Errors raised by the reader gateway.
///
/// Handler errors are logged and the connection keeps its state unless
/// [`GatewayError::is_fatal`] says otherwise; fatal errors close the
/// connection.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The device never acknowledged a message
    #[error("No acknowledgement for {message_type} after {attempts} attempts")]
    ProtocolTimeout { message_type: String, attempts: u32 },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Unknown reader: {0}")]
    UnknownReader(ReaderId),

    #[error("Invalid token for reader {0}")]
    InvalidToken(ReaderId),

    #[error("Reader not found: {0}")]
    ReaderNotFound(ReaderId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Card not found: {0}")]
    CardNotFound(CardId),

    /// The reader exists but has no live connection
    #[error("Reader {0} is not connected")]
    ReaderNotConnected(ReaderId),

    /// A state's enter or exit hook failed
    #[error("{state} {phase} failed: {source}")]
    Lifecycle {
        state: StateKind,
        phase: LifecyclePhase,
        #[source]
        source: Box<GatewayError>,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Core(#[from] attractap_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl GatewayError {
    /// Whether the connection must be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::ProtocolTimeout { .. }
                | GatewayError::Lifecycle { .. }
                | GatewayError::ConnectionClosed
        )
    }

    pub(crate) fn lifecycle(state: StateKind, phase: LifecyclePhase, source: GatewayError) -> Self {
        GatewayError::Lifecycle {
            state,
            phase,
            source: Box::new(source),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(GatewayError::ProtocolTimeout { message_type: "NFC_TAP".into(), attempts: 3 }, true)]
    #[case(GatewayError::ConnectionClosed, true)]
    #[case(
        GatewayError::lifecycle(StateKind::WaitForNfcTap, LifecyclePhase::Enter, GatewayError::ConnectionClosed),
        true
    )]
    #[case(GatewayError::UnexpectedMessage("x".into()), false)]
    #[case(GatewayError::CardNotFound(CardId::new(1)), false)]
    #[case(GatewayError::Core(attractap_core::Error::Storage("down".into())), false)]
    fn test_fatality(#[case] error: GatewayError, #[case] fatal: bool) {
        assert_eq!(error.is_fatal(), fatal);
    }

    #[test]
    fn test_lifecycle_message_names_state_and_phase() {
        let err = GatewayError::lifecycle(
            StateKind::EnrollCard,
            LifecyclePhase::Exit,
            GatewayError::ProtocolTimeout {
                message_type: "NFC_DISABLE_CARD_CHECKING".into(),
                attempts: 3,
            },
        );
        let text = err.to_string();
        assert!(text.contains("EnrollCard exit failed"));
        assert!(text.contains("NFC_DISABLE_CARD_CHECKING"));
    }
}
