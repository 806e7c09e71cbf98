use std::sync::Arc;

use tracing::info;

use crate::details::{DetailsCache, DetailsResolver};
use crate::endpoint::{Endpoint, SessionId};
use crate::error::SessionError;
use crate::session::{SessionDeps, SessionHandle, SessionOptions};

/// Builds sessions against one pty host.
///
/// Session details are looked up on the first `create` and reused for every
/// later session built by the same factory.
pub struct SessionFactory {
    host: String,
    tls: bool,
    details: DetailsCache,
    options: SessionOptions,
    deps: SessionDeps,
}

impl SessionFactory {
    pub fn new(
        host: impl Into<String>,
        resolver: Arc<dyn DetailsResolver>,
        deps: SessionDeps,
    ) -> Self {
        Self {
            host: host.into(),
            tls: true,
            details: DetailsCache::new(resolver),
            options: SessionOptions::default(),
            deps,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Resolves details and starts a session. Nothing is opened when the
    /// details or the endpoint are invalid.
    pub async fn create(&self, id: SessionId) -> Result<SessionHandle, SessionError> {
        let details = self.details.get(id).await?;
        let endpoint = Endpoint::new(self.host.clone(), details.port(), id).with_tls(self.tls);
        let url = endpoint.socket_url()?;
        info!(target: "tether::session", session = %id, url = %url, "creating session");
        Ok(SessionHandle::spawn(
            endpoint,
            details,
            self.options.clone(),
            self.deps.clone(),
        ))
    }
}
