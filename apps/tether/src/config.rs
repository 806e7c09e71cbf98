use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::Deserialize;
use tether_session::{CreditConfig, ReconnectPolicy, SessionOptions};

use crate::cli::Cli;
use crate::error::AppError;

const DEFAULT_HOST: &str = "localhost";

/// Contents of `config.toml`. Every field is optional; unset fields fall back
/// to the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub tls: Option<bool>,
    pub session: SessionSection,
    pub reconnect: ReconnectSection,
    pub render: RenderSection,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub auth_timeout_secs: Option<u64>,
    /// 0 turns the keepalive watchdog off.
    pub keepalive_timeout_secs: Option<u64>,
    pub outbound_capacity: Option<usize>,
    pub inbound_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectSection {
    pub interval_ms: Option<u64>,
    pub max_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RenderSection {
    pub high_watermark: Option<usize>,
    pub low_watermark: Option<usize>,
    pub chunk_threshold: Option<usize>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new().map(|base| base.config_dir().join("tether").join("config.toml"))
    }

    /// Loads `explicit` if given, otherwise the default path. Only a missing
    /// default file is tolerated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        match explicit {
            Some(path) => Self::read(path),
            None => match Self::default_path() {
                Some(path) => match Self::read(&path) {
                    Err(AppError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                        Ok(Self::default())
                    }
                    other => other,
                },
                None => Ok(Self::default()),
            },
        }
    }

    fn read(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|source| AppError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| AppError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// Effective configuration after layering CLI/env over the file over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub tls: bool,
    pub session: SessionOptions,
    pub credit: CreditConfig,
}

impl Settings {
    pub fn resolve(cli: &Cli, file: &FileConfig) -> Result<Self, AppError> {
        let host = cli
            .host
            .clone()
            .or_else(|| file.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        if host.trim().is_empty() {
            return Err(AppError::Config("host cannot be empty".into()));
        }
        let tls = match cli.no_tls {
            Some(no_tls) => !no_tls,
            None => file.tls.unwrap_or(true),
        };

        let mut session = SessionOptions::default();
        if let Some(secs) = cli.auth_timeout_secs.or(file.session.auth_timeout_secs) {
            if secs == 0 {
                return Err(AppError::Config("auth timeout must be at least 1s".into()));
            }
            session.auth_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.session.keepalive_timeout_secs {
            session.keepalive_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(capacity) = file.session.outbound_capacity {
            session.outbound_capacity = capacity;
        }
        if let Some(capacity) = file.session.inbound_capacity {
            session.inbound_capacity = capacity;
        }
        session.reconnect = reconnect_policy(cli, &file.reconnect)?;

        let credit = credit_config(&file.render)?;

        Ok(Self {
            host,
            tls,
            session,
            credit,
        })
    }
}

fn reconnect_policy(cli: &Cli, section: &ReconnectSection) -> Result<ReconnectPolicy, AppError> {
    let mut policy = ReconnectPolicy::default();
    if let Some(ms) = section.interval_ms {
        policy.interval = Duration::from_millis(ms);
    }
    if let Some(ms) = section.max_interval_ms {
        policy.max_interval = Duration::from_millis(ms);
    }
    if let Some(attempts) = cli.max_reconnect_attempts.or(section.max_attempts) {
        policy.max_attempts = attempts;
    }
    if policy.max_attempts == 0 {
        return Err(AppError::Config("max reconnect attempts must be at least 1".into()));
    }
    if policy.max_interval < policy.interval {
        return Err(AppError::Config(
            "reconnect max_interval_ms is below interval_ms".into(),
        ));
    }
    Ok(policy)
}

fn credit_config(section: &RenderSection) -> Result<CreditConfig, AppError> {
    let defaults = CreditConfig::default();
    let credit = CreditConfig {
        high_watermark: section.high_watermark.unwrap_or(defaults.high_watermark),
        low_watermark: section.low_watermark.unwrap_or(defaults.low_watermark),
        chunk_threshold: section.chunk_threshold.unwrap_or(defaults.chunk_threshold),
    };
    if credit.low_watermark >= credit.high_watermark {
        return Err(AppError::Config(format!(
            "render low_watermark ({}) must be below high_watermark ({})",
            credit.low_watermark, credit.high_watermark
        )));
    }
    Ok(credit)
}
