use std::path::PathBuf;
use std::sync::Arc;

use tether_session::SessionError;
use thiserror::Error;

use crate::telemetry::InitError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path:?}: {source}")]
    ConfigFile {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
    #[error(transparent)]
    Logging(#[from] InitError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("session ended: {0}")]
    SessionFailed(Arc<SessionError>),
}
