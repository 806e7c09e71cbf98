use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::endpoint::Endpoint;
use crate::error::SessionError;
use crate::health::{HealthProbe, HealthStatus};
use crate::session::SessionSnapshot;
use crate::transport::{Connector, TransportLink};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_MAX_ATTEMPTS: u32 = 50;

/// Spacing and bound of the health-check loop that precedes a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first unsuccessful health check.
    pub interval: Duration,
    /// Ceiling for the doubling delay.
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after unsuccessful attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.interval
            .saturating_mul(1u32 << shift)
            .min(self.max_interval.max(self.interval))
    }
}

/// Polls the health endpoint until the host agrees the session can be
/// re-attached, then opens a fresh transport.
///
/// Runs as its own task. The session's liveness is re-read before every step
/// so a destroyed session never gets a transport handed back.
pub(crate) struct Supervisor {
    pub endpoint: Endpoint,
    pub policy: ReconnectPolicy,
    pub probe: Arc<dyn HealthProbe>,
    pub connector: Arc<dyn Connector>,
    pub liveness: watch::Receiver<SessionSnapshot>,
}

impl Supervisor {
    pub async fn run(self) -> Result<TransportLink, SessionError> {
        let session = self.endpoint.session;
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            self.ensure_alive()?;
            match self.probe.check(&self.endpoint).await {
                Ok(HealthStatus::Healthy) => {
                    self.ensure_alive()?;
                    match self.connector.connect(&self.endpoint).await {
                        Ok(link) => {
                            self.ensure_alive()?;
                            info!(
                                target: "tether::reconnect",
                                session = %session,
                                attempt,
                                "transport re-established"
                            );
                            return Ok(link);
                        }
                        Err(err) => {
                            warn!(
                                target: "tether::reconnect",
                                session = %session,
                                attempt,
                                error = %err,
                                "host healthy but transport did not open"
                            );
                        }
                    }
                }
                Ok(HealthStatus::Unrecoverable) => {
                    error!(
                        target: "tether::reconnect",
                        session = %session,
                        "health check rejected the session; giving up"
                    );
                    return Err(SessionError::Unrecoverable(session));
                }
                Ok(HealthStatus::NotFound) => {
                    warn!(
                        target: "tether::reconnect",
                        session = %session,
                        "session no longer exists on the host"
                    );
                    return Err(SessionError::SessionNotFound(session));
                }
                Ok(HealthStatus::Conflict) => {
                    debug!(
                        target: "tether::reconnect",
                        session = %session,
                        attempt,
                        "host still holds the previous connection"
                    );
                }
                Ok(HealthStatus::Unexpected(code)) => {
                    debug!(
                        target: "tether::reconnect",
                        session = %session,
                        attempt,
                        status = code,
                        "unexpected health status"
                    );
                }
                Err(err) => {
                    debug!(
                        target: "tether::reconnect",
                        session = %session,
                        attempt,
                        error = %err,
                        "health check failed"
                    );
                }
            }

            self.ensure_alive()?;
            if attempt < max_attempts {
                sleep(self.policy.delay_after(attempt)).await;
            }
        }

        warn!(
            target: "tether::reconnect",
            session = %session,
            attempts = max_attempts,
            "reconnect attempts exhausted"
        );
        Err(SessionError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    fn ensure_alive(&self) -> Result<(), SessionError> {
        if self.liveness.borrow().state.is_destroyed() {
            debug!(
                target: "tether::reconnect",
                session = %self.endpoint.session,
                "session destroyed; abandoning reconnect"
            );
            return Err(SessionError::Destroyed);
        }
        Ok(())
    }
}
