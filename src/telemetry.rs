//! Tracing subscriber setup.
//!
//! Every crate in the workspace logs through `tracing` macros with structured
//! fields. This module installs a subscriber for them, configured from the
//! environment:
//!
//! - `RUST_LOG` - full filter directives (takes precedence)
//! - `TENANTSCALE_LOG_LEVEL=trace|debug|info|warn|error|off` - global level
//! - `TENANTSCALE_DEBUG=1` - shorthand for `debug` when no level is set
//! - `TENANTSCALE_LOG_FORMAT=json|pretty|compact` - output format (default `json`)
//! - `TENANTSCALE_LOG_COLOR=1|0` - ANSI colors for `pretty` and `compact`

use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Minimum level for the default filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "off" | "none" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Off => "off",
        }
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Single-line human-readable output
    Compact,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Filter directives from `RUST_LOG`, used verbatim when set
    pub directives: Option<String>,
    /// Level used when no directives are given
    pub level: LogLevel,
    /// Output format
    pub format: LogFormat,
    /// Whether ANSI colors are enabled
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            directives: None,
            level: LogLevel::Info,
            format: LogFormat::Json,
            ansi: false,
        }
    }
}

impl TelemetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| {
            lookup(name).map(|v| {
                let v = v.trim().to_lowercase();
                v == "1" || v == "true"
            })
        };

        let debug = flag("TENANTSCALE_DEBUG").unwrap_or(false);

        let level = lookup("TENANTSCALE_LOG_LEVEL")
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(if debug { LogLevel::Debug } else { LogLevel::Info });

        let format = lookup("TENANTSCALE_LOG_FORMAT")
            .and_then(|s| LogFormat::parse(&s))
            .unwrap_or(LogFormat::Json);

        Self {
            directives: lookup("RUST_LOG").filter(|d| !d.trim().is_empty()),
            level,
            format,
            ansi: flag("TENANTSCALE_LOG_COLOR").unwrap_or(false),
        }
    }

    /// Set the level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Filter built from the directives, or the level when they are unset or
    /// invalid.
    pub fn filter(&self) -> EnvFilter {
        self.directives
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(self.level.as_str()))
    }

    /// Build a subscriber for this configuration.
    pub fn subscriber(&self) -> Box<dyn Subscriber + Send + Sync> {
        let registry = tracing_subscriber::registry().with(self.filter());

        match self.format {
            LogFormat::Json => Box::new(registry.with(fmt::layer().json())),
            LogFormat::Pretty => Box::new(registry.with(fmt::layer().pretty().with_ansi(self.ansi))),
            LogFormat::Compact => {
                Box::new(registry.with(fmt::layer().compact().with_ansi(self.ansi)))
            }
        }
    }
}

/// Subscriber configured from the environment.
pub fn subscriber() -> Box<dyn Subscriber + Send + Sync> {
    TelemetryConfig::from_env().subscriber()
}

/// Install the environment-configured subscriber as the global default.
///
/// Fails if a global subscriber is already set.
pub fn try_init() -> Result<(), SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(subscriber())
}

/// Install the environment-configured subscriber, ignoring a subscriber that
/// is already installed.
pub fn init() {
    if try_init().is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}
