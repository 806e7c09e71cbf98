mod factory_test;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::details::SessionDetails;
use crate::endpoint::{Endpoint, SessionId};
use crate::session::{SessionConsumer, SessionDeps, SessionHandle, SessionOptions};
use crate::transport::mock::{MockConnector, MockPeer, RecordingRegistry, ScriptedProbe};

pub(crate) const TOKEN: &str = "d41d8cd9";
pub(crate) const ID: SessionId = SessionId(7);

pub(crate) struct Harness {
    pub handle: SessionHandle,
    pub connector: Arc<MockConnector>,
    pub probe: Arc<ScriptedProbe>,
    pub registry: Arc<RecordingRegistry>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl Harness {
    pub fn start(health: impl IntoIterator<Item = u16>, fallback: u16) -> Self {
        Self::with_options(health, fallback, SessionOptions::default())
    }

    pub fn with_options(
        health: impl IntoIterator<Item = u16>,
        fallback: u16,
        options: SessionOptions,
    ) -> Self {
        let (connector, peers) = MockConnector::new();
        let probe = ScriptedProbe::new(health, fallback);
        let registry = Arc::new(RecordingRegistry::default());
        let deps = SessionDeps {
            connector: connector.clone(),
            probe: probe.clone(),
            registry: registry.clone(),
        };
        let endpoint = Endpoint::new("localhost", 4000, ID).with_tls(false);
        let handle = SessionHandle::spawn(endpoint, SessionDetails::new(TOKEN, 4000), options, deps);
        Self {
            handle,
            connector,
            probe,
            registry,
            peers,
        }
    }

    pub async fn next_peer(&mut self) -> MockPeer {
        self.peers.recv().await.expect("session never opened a transport")
    }

    /// Opens and authenticates the next transport.
    pub async fn connected_peer(&mut self) -> MockPeer {
        let mut peer = self.next_peer().await;
        peer.accept(TOKEN).await;
        peer
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delivery {
    Data(String),
    Close,
}

pub(crate) struct ChannelConsumer(pub mpsc::UnboundedSender<Delivery>);

impl SessionConsumer for ChannelConsumer {
    fn on_data(&mut self, chunk: &str) {
        let _ = self.0.send(Delivery::Data(chunk.to_string()));
    }

    fn on_close(&mut self) {
        let _ = self.0.send(Delivery::Close);
    }
}

pub(crate) fn consumer() -> (ChannelConsumer, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelConsumer(tx), rx)
}

pub(crate) fn data(chunk: &str) -> Delivery {
    Delivery::Data(chunk.to_string())
}

/// Lets every task run until the runtime would otherwise idle.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
