use std::{io::IsTerminal, net::SocketAddr, path::PathBuf, str::FromStr};

use clap::{Parser, ValueEnum};
use config::{Config, Environment};
use log::LevelFilter;
use logforth::filter::EnvFilter;

const WORKSPACE_CRATES: [&str; 4] = ["warden", "server", "rate_limit", "config"];

#[derive(Debug, Parser)]
#[command(name = "Warden", version, long_about = concat!("Warden v", env!("CARGO_PKG_VERSION")))]
pub struct Args {
    /// IP address on which the server will listen for incoming connections.
    /// Default: 127.0.0.1:8000
    #[arg(short, long, env = "WARDEN_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,
    /// Path to the TOML configuration file
    #[arg(long, short, env = "WARDEN_CONFIG_PATH", default_value = "./warden.toml")]
    pub config: PathBuf,
    /// Deployment environment, overriding `server.environment`.
    #[arg(long, env = "NODE_ENV")]
    pub environment: Option<Environment>,
    /// Comma-separated origins allowed in production, overriding `server.cors.allowed_origins`.
    #[arg(long, env = "ALLOWED_ORIGINS")]
    pub allowed_origins: Option<String>,
    /// Set the logging level for all workspace crates.
    #[arg(long = "log", env = "WARDEN_LOG", value_enum, default_value = "info")]
    pub log_level: LogLevel,
    /// Set the style of log output. Colored on a terminal, plain text otherwise.
    #[arg(long, env = "WARDEN_LOG_STYLE", value_enum)]
    log_style: Option<LogStyle>,
}

impl Args {
    /// Loads the configuration file, or the defaults if there is none, applies the overrides and
    /// validates the result. Returns the configuration with its warnings.
    pub fn config(&self) -> anyhow::Result<(Config, Vec<String>)> {
        let mut config = if self.config.exists() {
            Config::load(&self.config)?
        } else {
            Config::default()
        };

        if let Some(environment) = self.environment {
            config.server.environment = environment;
        }

        if let Some(origins) = &self.allowed_origins {
            config.server.cors.set_allowed_origins(origins);
        }

        let warnings = config.validate()?;

        Ok((config, warnings))
    }

    pub(crate) fn log_style(&self) -> LogStyle {
        self.log_style.unwrap_or_else(LogStyle::detect)
    }
}

/// How log lines are rendered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogStyle {
    /// Colorized text, the default with TTY output
    Color,
    /// Standard text, the default with non-TTY output
    Text,
    /// JSON objects
    Json,
}

impl LogStyle {
    fn detect() -> Self {
        if std::io::stdout().is_terminal() {
            LogStyle::Color
        } else {
            LogStyle::Text
        }
    }
}

/// Verbosity of the workspace crates. Dependencies only report warnings and errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl LogLevel {
    pub fn env_filter(self) -> EnvFilter {
        let level = LevelFilter::from(self);

        let directives = match level {
            LevelFilter::Off => "off".to_string(),
            level => {
                let level = level.as_str().to_lowercase();
                WORKSPACE_CRATES
                    .iter()
                    .fold("warn".to_string(), |directives, krate| format!("{directives},{krate}={level}"))
            }
        };

        EnvFilter::from_str(&directives).expect("These all are valid env filters.")
    }
}
