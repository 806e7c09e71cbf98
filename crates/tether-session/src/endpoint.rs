use std::fmt;

use url::Url;

use crate::error::SessionError;

/// Identity of a terminal on the pty host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a session's socket and health check live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub session: SessionId,
    /// `wss://`/`https://` when set, plain `ws://`/`http://` otherwise.
    pub tls: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, session: SessionId) -> Self {
        Self {
            host: host.into(),
            port,
            session,
            tls: true,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn socket_url(&self) -> Result<Url, SessionError> {
        let scheme = if self.tls { "wss" } else { "ws" };
        self.build(scheme, "pty/ws")
    }

    pub fn health_url(&self) -> Result<Url, SessionError> {
        let scheme = if self.tls { "https" } else { "http" };
        self.build(scheme, "health")
    }

    fn build(&self, scheme: &str, route: &str) -> Result<Url, SessionError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(SessionError::InvalidConfig("host cannot be empty".into()));
        }
        let raw = format!(
            "{scheme}://{host}:{port}/{route}/{id}",
            port = self.port,
            id = self.session
        );
        Url::parse(&raw)
            .map_err(|err| SessionError::InvalidConfig(format!("invalid endpoint {raw}: {err}")))
    }
}
