use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::endpoint::Endpoint;

#[cfg(test)]
pub(crate) mod mock;
pub mod websocket;

pub use websocket::WebSocketConnector;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("transport closed")]
    Closed,
}

/// Something that happened on a live connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    /// Socket-level error. A `Closed` event follows if the connection is gone.
    Error(String),
    Closed { reason: Option<String> },
}

/// Session-side ends of one duplex connection.
///
/// Dropping the link releases the connection: the pump flushes whatever was
/// already sent and then closes the socket.
#[derive(Debug)]
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Connection-side ends matching a [`TransportLink`].
#[derive(Debug)]
pub struct LinkPump {
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportLink {
    pub fn pair() -> (TransportLink, LinkPump) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            TransportLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            LinkPump {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }

    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    /// Next event; a vanished pump reads as a close.
    pub async fn recv(&mut self) -> TransportEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed { reason: None })
    }
}

/// Opens a fresh connection to a session endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportLink, TransportError>;
}
