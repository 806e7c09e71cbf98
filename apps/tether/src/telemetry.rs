//! Process-wide logging for the `tether` binary.
//!
//! The chosen level applies to tether's own targets. Everything else,
//! including the transport stacks underneath, stays at `info` or quieter
//! unless `TETHER_TRACE_DEPS=1`. `TETHER_LOG_FILTER` replaces the whole
//! filter with a raw `EnvFilter` directive string.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const FILTER_ENV: &str = "TETHER_LOG_FILTER";
const TRACE_DEPS_ENV: &str = "TETHER_TRACE_DEPS";

/// Targets emitted by the session crate and this binary.
const TETHER_TARGETS: &[&str] = &[
    "tether::session",
    "tether::reconnect",
    "tether::transport",
    "tether::app",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid {FILTER_ENV}: {0}")]
    Filter(String),
    #[error("failed to install logger: {0}")]
    Install(String),
}

/// Filter directives for a level. `capped` is set when other crates were
/// held at `info` below a more verbose tether level.
#[derive(Debug, PartialEq, Eq)]
struct Directives {
    text: String,
    capped: bool,
}

impl Directives {
    fn for_level(level: LogLevel, dependency_traces: bool) -> Self {
        let ours = LevelFilter::from(level);
        let others = if dependency_traces {
            ours
        } else {
            ours.min(LevelFilter::INFO)
        };
        let mut text = others.to_string().to_lowercase();
        for target in TETHER_TARGETS {
            text.push_str(&format!(",{target}={}", ours.to_string().to_lowercase()));
        }
        Self {
            text,
            capped: others != ours,
        }
    }
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let (filter, capped) = match std::env::var(FILTER_ENV) {
        Ok(raw) => (
            EnvFilter::try_new(&raw).map_err(|err| InitError::Filter(err.to_string()))?,
            false,
        ),
        Err(_) => {
            let directives = Directives::for_level(config.level, dependency_traces_enabled());
            let filter = EnvFilter::try_new(&directives.text)
                .map_err(|err| InitError::Filter(err.to_string()))?;
            (filter, directives.capped)
        }
    };

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let verbose = config.level >= LogLevel::Debug;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(config.file.is_none())
                .with_target(verbose)
                .with_thread_names(verbose),
        )
        .try_init()
        .map_err(|err| InitError::Install(err.to_string()))?;

    let _ = GUARD.set(guard);
    if capped {
        tracing::debug!(
            target: "tether::app",
            "other crates capped at info; set {TRACE_DEPS_ENV}=1 to lift"
        );
    }
    Ok(())
}

fn dependency_traces_enabled() -> bool {
    std::env::var(TRACE_DEPS_ENV).is_ok_and(|value| !value.is_empty() && value != "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_applies_to_every_tether_target() {
        let directives = Directives::for_level(LogLevel::Debug, false);
        assert!(directives.text.starts_with("info,"));
        for target in TETHER_TARGETS {
            assert!(directives.text.contains(&format!("{target}=debug")));
        }
        assert!(directives.capped);
    }

    #[test]
    fn other_crates_follow_quiet_levels() {
        let directives = Directives::for_level(LogLevel::Warn, false);
        assert!(directives.text.starts_with("warn,"));
        assert!(directives.text.contains("tether::reconnect=warn"));
        assert!(!directives.capped);
    }

    #[test]
    fn dependency_traces_lift_the_cap() {
        let directives = Directives::for_level(LogLevel::Trace, true);
        assert!(directives.text.starts_with("trace,"));
        assert!(!directives.capped);
    }

    #[test]
    fn directives_parse_as_env_filter() {
        for level in [LogLevel::Error, LogLevel::Info, LogLevel::Trace] {
            let directives = Directives::for_level(level, false);
            assert!(EnvFilter::try_new(&directives.text).is_ok());
        }
    }
}
