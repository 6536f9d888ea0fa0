use crate::session::SessionState;
use chat_proto::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("Timed out waiting for login response after {0} attempts")]
    LoginTimeout(u32),

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid nickname: {0}")]
    InvalidNickname(String),

    #[error("Cannot {event} while {state}")]
    InvalidTransition {
        state: SessionState,
        event: &'static str,
    },

    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => ClientError::Transport(e),
            other => ClientError::Protocol(other),
        }
    }
}
