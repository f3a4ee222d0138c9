//! Structured logging for fira
//!
//! Pretty output for interactive runs, JSON lines for CI, and an optional
//! log file that receives a copy of everything.
//!
//! # Usage
//!
//! ```ignore
//! use fira_core::logging::{init_logging, LogConfig};
//! use fira_core::config::LogFormat;
//!
//! let config = LogConfig {
//!     level: "info".to_string(),
//!     format: LogFormat::Pretty,
//!     file: None,
//! };
//! init_logging(&config)?;
//! ```
//!
//! # Correlation Fields
//!
//! Use these field names consistently in spans and events:
//! - `side`: initiator or responder
//! - `session_id`: FiRA session id
//! - `event`: callback name being waited on or received
//! - `elapsed_ms`: time spent waiting
//! - `scenario`: scenario name

pub use crate::config::LogFormat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::GeneralConfig;

static INSTALLED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level name or `EnvFilter` directive. `RUST_LOG` overrides it.
    pub level: String,

    pub format: LogFormat,

    /// Also append every record to this file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl From<&GeneralConfig> for LogConfig {
    fn from(general: &GeneralConfig) -> Self {
        Self {
            level: general.log_level.clone(),
            format: general.log_format,
            file: general.log_file.as_ref().map(PathBuf::from),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("failed to create log file: {0}")]
    FileCreate(#[from] io::Error),

    #[error("failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    File::options().create(true).append(true).open(path)
}

/// Bare level names must parse; anything with `=` or `,` is an
/// `EnvFilter` directive and is passed through as-is.
fn validate_level(level: &str) -> Result<(), LogError> {
    if level.contains(['=', ',']) || level.parse::<Level>().is_ok() {
        Ok(())
    } else {
        Err(LogError::InvalidLevel(level.to_string()))
    }
}

/// Formatting layer for `format`, writing to `writer`.
fn format_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_timer(SystemTime)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .boxed(),
    }
}

/// Install the global subscriber on stderr, plus a copy to the log file
/// when one is configured. Only the first call succeeds.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if INSTALLED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }
    validate_level(&config.level)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<BoxedLayer> = vec![format_layer(config.format, io::stderr, true)];
    if let Some(path) = &config.file {
        let file = open_log_file(path)?;
        layers.push(format_layer(config.format, file, false));
    }

    tracing::subscriber::set_global_default(Registry::default().with(layers).with(filter))?;
    let _ = INSTALLED.set(());

    tracing::info!(
        log_level = %config.level,
        log_format = %config.format,
        log_file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}

/// Create a span with the standard correlation fields
///
/// ```ignore
/// let span = fira_core::fira_span!("scenario", scenario = "basic_ranging");
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! fira_span {
    ($name:expr $(, $field:ident = $value:expr)* $(,)?) => {
        tracing::info_span!($name $(, $field = $value)*)
    };
}
