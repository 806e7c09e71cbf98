//! In-memory connector, health probe and registry for driving sessions in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_proto::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;

use super::{Connector, TransportError, TransportEvent, TransportLink};
use crate::endpoint::{Endpoint, SessionId};
use crate::health::{HealthError, HealthProbe, HealthStatus};
use crate::session::TerminalRegistry;

/// Hands the host side of every opened link to the test.
pub(crate) struct MockConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    fail_next: AtomicUsize,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            peers,
            fail_next: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        });
        (connector, peer_rx)
    }

    /// Makes the next `count` connects fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<TransportLink, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Closed);
        }
        let (link, pump) = TransportLink::pair();
        let peer = MockPeer {
            outbound: pump.outbound,
            inbound: pump.inbound,
        };
        self.peers.send(peer).map_err(|_| TransportError::Closed)?;
        Ok(link)
    }
}

/// Host end of a mock link.
pub(crate) struct MockPeer {
    outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl MockPeer {
    /// Next frame written by the session; `None` once the session let go of the link.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        let raw = self.outbound.recv().await?;
        Some(ClientFrame::decode(&raw).expect("session wrote an undecodable frame"))
    }

    pub async fn expect(&mut self, frame: ClientFrame) {
        assert_eq!(self.recv().await, Some(frame));
    }

    /// Frames already written, without waiting.
    pub fn pending_frames(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(raw) = self.outbound.try_recv() {
            frames.push(ClientFrame::decode(&raw).expect("session wrote an undecodable frame"));
        }
        frames
    }

    /// Everything the session writes until it drops the link.
    pub async fn until_released(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.recv().await {
            frames.push(frame);
        }
        frames
    }

    pub fn push(&self, frame: ServerFrame) {
        self.push_raw(&frame.encode());
    }

    pub fn push_raw(&self, text: &str) {
        let _ = self.inbound.send(TransportEvent::Frame(text.to_string()));
    }

    pub fn close(&self) {
        let _ = self.inbound.send(TransportEvent::Closed { reason: None });
    }

    /// Plays the host side of the handshake.
    pub async fn accept(&mut self, token: &str) {
        self.expect(ClientFrame::Auth(token.to_string())).await;
        self.push(ServerFrame::AuthAccepted);
        self.expect(ClientFrame::Resume).await;
    }
}

/// Answers health checks from a script, then with `fallback`.
pub(crate) struct ScriptedProbe {
    codes: Mutex<VecDeque<u16>>,
    fallback: u16,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(codes: impl IntoIterator<Item = u16>, fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            codes: Mutex::new(codes.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self, _endpoint: &Endpoint) -> Result<HealthStatus, HealthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let code = self.codes.lock().pop_front().unwrap_or(self.fallback);
        Ok(HealthStatus::from_code(code))
    }
}

#[derive(Default)]
pub(crate) struct RecordingRegistry {
    removed: Mutex<Vec<SessionId>>,
}

impl RecordingRegistry {
    pub fn removed(&self) -> Vec<SessionId> {
        self.removed.lock().clone()
    }
}

impl TerminalRegistry for RecordingRegistry {
    fn remove_terminal(&self, id: SessionId) {
        self.removed.lock().push(id);
    }
}
