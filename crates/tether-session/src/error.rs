use std::time::Duration;

use thiserror::Error;

use crate::endpoint::SessionId;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session details: {0}")]
    InvalidDetails(String),
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("auth ack not received within {0:?}")]
    AuthTimeout(Duration),
    #[error("transport closed before the handshake completed")]
    HandshakeClosed,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("session {0} no longer exists on the host")]
    SessionNotFound(SessionId),
    #[error("host reported session {0} as unrecoverable")]
    Unrecoverable(SessionId),
    #[error("gave up reconnecting after {attempts} health checks")]
    RetriesExhausted { attempts: u32 },
    #[error("session destroyed")]
    Destroyed,
}
