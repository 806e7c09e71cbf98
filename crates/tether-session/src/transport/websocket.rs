use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::{Connector, LinkPump, TransportError, TransportEvent, TransportLink};
use crate::endpoint::{Endpoint, SessionId};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Text-frame WebSocket connection to `/pty/ws/{id}`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<TransportLink, TransportError> {
        let url = endpoint
            .socket_url()
            .map_err(|err| TransportError::Endpoint(err.to_string()))?;
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;
        debug!(
            target: "tether::transport",
            session = %endpoint.session,
            url = %url,
            "websocket connected"
        );
        let (link, pump) = TransportLink::pair();
        tokio::spawn(pump_socket(ws_stream, pump, endpoint.session));
        Ok(link)
    }
}

async fn pump_socket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pump: LinkPump,
    session: SessionId,
) {
    let LinkPump {
        mut outbound,
        inbound,
    } = pump;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(text) => {
                    if let Err(err) = ws_sender.send(Message::Text(text)).await {
                        let _ = inbound.send(TransportEvent::Error(err.to_string()));
                        break Some(err.to_string());
                    }
                }
                None => {
                    // link released by the session; queued frames are already written
                    trace!(target: "tether::transport", session = %session, "closing websocket");
                    let _ = ws_sender.close().await;
                    return;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound.send(TransportEvent::Frame(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        let _ = inbound.send(TransportEvent::Frame(text));
                    }
                    Err(err) => {
                        warn!(
                            target: "tether::transport",
                            session = %session,
                            error = %err,
                            "discarding non-utf8 binary frame"
                        );
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|frame| frame.reason.to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = inbound.send(TransportEvent::Error(err.to_string()));
                    break Some(err.to_string());
                }
                None => break None,
            },
        }
    };

    debug!(
        target: "tether::transport",
        session = %session,
        reason = reason.as_deref().unwrap_or(""),
        "websocket closed"
    );
    let _ = inbound.send(TransportEvent::Closed { reason });
}
