use crate::pairing::SessionState;
use crate::protocol::FrameError;
use crate::transport::TransportError;

/// Errors surfaced by a [`crate::Tv`] session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),
    #[error("client key rejected: {0}")]
    AuthenticationRejected(String),
    #[error("connection lost while waiting for pairing confirmation")]
    PairingAborted,
    #[error("session is not registered")]
    NotRegistered,
    #[error("command rejected: {details}")]
    CommandRejected { details: String },
    #[error("connection closed")]
    ConnectionClosed,
    #[error("timed out waiting for a reply")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("operation not allowed in state {0:?}")]
    InvalidState(SessionState),
    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),
}
