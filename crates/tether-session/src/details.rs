use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::endpoint::SessionId;
use crate::error::SessionError;

const FIELD_DELIMITER: char = ':';

/// Credentials and port of the pty host, as handed out by the detail lookup.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionDetails {
    auth_token: String,
    port: u16,
}

impl SessionDetails {
    pub fn new(auth_token: impl Into<String>, port: u16) -> Self {
        Self {
            auth_token: auth_token.into(),
            port,
        }
    }

    /// Parses the `token:port` string returned by the host.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let fields: Vec<&str> = raw.trim().split(FIELD_DELIMITER).collect();
        let [token, port] = fields.as_slice() else {
            return Err(SessionError::InvalidDetails(format!(
                "expected 2 fields, got {}",
                fields.len()
            )));
        };
        if token.is_empty() {
            return Err(SessionError::InvalidDetails("auth token is empty".into()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|err| SessionError::InvalidDetails(format!("bad port {port:?}: {err}")))?;
        Ok(Self::new(*token, port))
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for SessionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDetails")
            .field("auth_token", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// One-shot lookup of the raw session details, keyed by the last terminal id
/// the caller knows about.
#[async_trait]
pub trait DetailsResolver: Send + Sync {
    async fn resolve(&self, last_known: SessionId) -> Result<String, SessionError>;
}

/// Resolver for details supplied up front (CLI flag, environment).
#[derive(Clone)]
pub struct StaticResolver {
    raw: String,
}

impl StaticResolver {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }
}

#[async_trait]
impl DetailsResolver for StaticResolver {
    async fn resolve(&self, _last_known: SessionId) -> Result<String, SessionError> {
        Ok(self.raw.clone())
    }
}

/// Resolves details once and hands out copies afterwards. Failed lookups are
/// not cached.
pub struct DetailsCache {
    resolver: Arc<dyn DetailsResolver>,
    cell: OnceCell<SessionDetails>,
}

impl DetailsCache {
    pub fn new(resolver: Arc<dyn DetailsResolver>) -> Self {
        Self {
            resolver,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self, last_known: SessionId) -> Result<SessionDetails, SessionError> {
        let details = self
            .cell
            .get_or_try_init(|| async {
                let raw = self.resolver.resolve(last_known).await?;
                let details = SessionDetails::parse(&raw)?;
                debug!(
                    target: "tether::session",
                    last_known = %last_known,
                    port = details.port(),
                    "resolved session details"
                );
                Ok::<_, SessionError>(details)
            })
            .await?;
        Ok(details.clone())
    }
}
