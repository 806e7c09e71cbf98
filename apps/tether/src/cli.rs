use clap::{builder::BoolishValueParser, Args, Parser};
use std::path::PathBuf;

use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    about = "Attach the local terminal to a remote pty session",
    author,
    version
)]
pub struct Cli {
    #[arg(long, env = "TETHER_ID", help = "Terminal id on the pty host")]
    pub id: u32,

    #[arg(
        long,
        env = "TETHER_DETAILS",
        value_name = "TOKEN:PORT",
        hide_env_values = true,
        help = "Session details handed out by the pty host"
    )]
    pub details: String,

    #[arg(long, env = "TETHER_HOST", help = "Pty host name [default: localhost]")]
    pub host: Option<String>,

    #[arg(
        long = "no-tls",
        env = "TETHER_NO_TLS",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        value_name = "BOOL",
        help = "Use ws:// and http:// instead of wss:// and https://"
    )]
    pub no_tls: Option<bool>,

    #[arg(
        long,
        env = "TETHER_CONFIG",
        value_name = "PATH",
        help = "Tuning file [default: <config dir>/tether/config.toml]"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "auth-timeout",
        env = "TETHER_AUTH_TIMEOUT",
        value_name = "SECS",
        help = "Seconds to wait for the host to accept the auth token"
    )]
    pub auth_timeout_secs: Option<u64>,

    #[arg(
        long = "max-reconnect-attempts",
        env = "TETHER_MAX_RECONNECT_ATTEMPTS",
        value_name = "N",
        help = "Health checks before giving up on a lost session"
    )]
    pub max_reconnect_attempts: Option<u32>,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "TETHER_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "TETHER_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
