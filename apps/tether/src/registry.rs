use std::collections::HashMap;

use parking_lot::Mutex;
use tether_session::{SessionHandle, SessionId, TerminalRegistry};
use tokio::sync::Notify;
use tracing::info;

/// Open terminals by id.
#[derive(Default)]
pub struct Registry {
    terminals: Mutex<HashMap<SessionId, SessionHandle>>,
    emptied: Notify,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.terminals.lock().insert(handle.id(), handle);
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.terminals.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.terminals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.lock().is_empty()
    }

    /// Resolves once the last terminal has been removed.
    pub async fn wait_until_empty(&self) {
        loop {
            if self.is_empty() {
                return;
            }
            self.emptied.notified().await;
        }
    }
}

impl TerminalRegistry for Registry {
    fn remove_terminal(&self, id: SessionId) {
        let now_empty = {
            let mut terminals = self.terminals.lock();
            if terminals.remove(&id).is_none() {
                return;
            }
            terminals.is_empty()
        };
        info!(target: "tether::app", terminal = %id, "terminal removed");
        if now_empty {
            self.emptied.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tether_session::{Endpoint, SessionDeps, SessionDetails, SessionOptions};
    use test_timeout::tokio_timeout_test;

    // Nothing listens on the discard port, so these sessions just fail to connect.
    fn idle_session(registry: &Arc<Registry>, id: u32) -> SessionHandle {
        let endpoint = Endpoint::new("127.0.0.1", 9, SessionId(id)).with_tls(false);
        let deps = SessionDeps::websocket(registry.clone()).unwrap();
        SessionHandle::spawn(
            endpoint,
            SessionDetails::new("tok", 9),
            SessionOptions::default(),
            deps,
        )
    }

    #[tokio_timeout_test(10)]
    async fn removal_is_idempotent_and_signals_empty() {
        let registry = Arc::new(Registry::new());
        registry.insert(idle_session(&registry, 1));
        registry.insert(idle_session(&registry, 2));
        assert_eq!(registry.len(), 2);
        assert!(registry.get(SessionId(2)).is_some());

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_until_empty().await })
        };

        registry.remove_terminal(SessionId(1));
        registry.remove_terminal(SessionId(1));
        assert_eq!(registry.len(), 1);
        assert!(!waiter.is_finished());

        registry.remove_terminal(SessionId(2));
        waiter.await.unwrap();
        assert!(registry.is_empty());
        assert!(registry.get(SessionId(2)).is_none());
    }

    #[tokio_timeout_test(10)]
    async fn empty_registry_does_not_wait() {
        let registry = Registry::new();
        registry.wait_until_empty().await;
        registry.remove_terminal(SessionId(5));
        assert!(registry.is_empty());
    }
}
