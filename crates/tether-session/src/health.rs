use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::endpoint::Endpoint;

/// Host verdict on whether a session can be re-attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// 200: the terminal exists and has no socket attached.
    Healthy,
    /// 400: the host cannot make sense of the request; retrying is pointless.
    Unrecoverable,
    /// 404: the terminal is gone.
    NotFound,
    /// 409: the host still holds the previous socket.
    Conflict,
    Unexpected(u16),
}

impl HealthStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            200 => HealthStatus::Healthy,
            400 => HealthStatus::Unrecoverable,
            404 => HealthStatus::NotFound,
            409 => HealthStatus::Conflict,
            other => HealthStatus::Unexpected(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid health endpoint: {0}")]
    Endpoint(String),
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, endpoint: &Endpoint) -> Result<HealthStatus, HealthError>;
}

pub struct ReqwestHealthProbe {
    client: reqwest::Client,
}

impl ReqwestHealthProbe {
    pub fn new() -> Result<Self, HealthError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for ReqwestHealthProbe {
    async fn check(&self, endpoint: &Endpoint) -> Result<HealthStatus, HealthError> {
        let url = endpoint
            .health_url()
            .map_err(|err| HealthError::Endpoint(err.to_string()))?;
        let response = self.client.get(url).send().await?;
        Ok(HealthStatus::from_code(response.status().as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes() {
        assert_eq!(HealthStatus::from_code(200), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_code(400), HealthStatus::Unrecoverable);
        assert_eq!(HealthStatus::from_code(404), HealthStatus::NotFound);
        assert_eq!(HealthStatus::from_code(409), HealthStatus::Conflict);
        assert_eq!(HealthStatus::from_code(503), HealthStatus::Unexpected(503));
        assert_eq!(HealthStatus::from_code(204), HealthStatus::Unexpected(204));
    }
}
