//! Error types for fira-core

use std::fmt::Write;
use thiserror::Error;

use crate::device::Side;
use crate::event::EventName;
use crate::facade::{ApiError, MeasurementKind};
use crate::params::UwbAddress;
use crate::session::SessionState;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fira-core
///
/// Session-level failures carry the device side, the awaited event or
/// condition, and the elapsed time so a failed scenario can be read without
/// the log.
#[derive(Error, Debug)]
pub enum Error {
    /// A confirming callback did not arrive in time
    #[error(
        "{side}: timed out after {elapsed_ms}ms waiting for {expected} on {target} (last_observed={})",
        .last_observed.as_deref().unwrap_or("none")
    )]
    Timeout {
        side: Side,
        target: String,
        expected: String,
        elapsed_ms: u64,
        last_observed: Option<String>,
    },

    /// The remote facade rejected a call
    #[error("{side}: {source}")]
    Api {
        side: Side,
        #[source]
        source: ApiError,
    },

    /// The facade had no value for a measurement
    #[error("{side}: no {kind} measurement for peer {peer}")]
    MeasurementUnavailable {
        side: Side,
        kind: MeasurementKind,
        peer: UwbAddress,
    },

    /// A scenario condition did not hold
    #[error("{side}: verification failed after {elapsed_ms}ms: {condition}")]
    VerificationFailed {
        side: Side,
        condition: String,
        elapsed_ms: u64,
    },

    /// The facade answered a lifecycle verb with its failure callback
    #[error("{side}: session {session_id} {op} rejected with {event}")]
    LifecycleRejected {
        side: Side,
        session_id: u32,
        op: &'static str,
        event: EventName,
    },

    /// A call expected to be rejected succeeded
    #[error("{side}: {op} succeeded but was expected to be rejected")]
    UnexpectedSuccess { side: Side, op: String },

    /// Lifecycle verb called in a state that does not allow it
    #[error("{side}: cannot {op} session {session_id} in state {state}")]
    InvalidState {
        side: Side,
        session_id: u32,
        state: SessionState,
        op: &'static str,
    },

    #[error("{side}: no open session with id {session_id}")]
    UnknownSession { side: Side, session_id: u32 },

    #[error("Invalid ranging params: {0}")]
    InvalidParams(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A spawned disruption task panicked or was cancelled
    #[error("Disruption task failed: {0}")]
    Join(String),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Timeout { expected, .. } => Some(
                Remediation::new(format!(
                    "No {expected} callback arrived. Check that both devices are awake and in range."
                ))
                .command("Show timeouts", "fira config")
                .alternative("Raise timeouts.callback_wait_ms in fira.toml for slow devices."),
            ),
            Self::Api { .. } => Some(
                Remediation::new("The device rejected the request. Check the session parameters and device state.")
                    .command("Show effective config", "fira config")
                    .alternative("Toggle airplane mode off and make sure UWB is enabled."),
            ),
            Self::MeasurementUnavailable { kind, .. } => Some(
                Remediation::new(format!(
                    "The device reported no {kind} value. Confirm the peer is ranging."
                ))
                .command("Run basic ranging", "fira run basic-ranging")
                .alternative("AoA values require aoaResultRequest to be enabled."),
            ),
            Self::VerificationFailed { .. } => Some(
                Remediation::new("A ranging assertion failed. Check device placement and parameters.")
                    .command("Re-run with debug logs", "RUST_LOG=fira_core=debug fira run basic-ranging")
                    .alternative("Verify both sides use the same session id, channel and preamble."),
            ),
            Self::LifecycleRejected { op, .. } => Some(
                Remediation::new(format!("The device reported a failure for {op}."))
                    .command("Re-run with debug logs", "RUST_LOG=fira_core=debug fira run basic-ranging")
                    .alternative("Close stale sessions before reusing a session id."),
            ),
            Self::UnexpectedSuccess { .. } => Some(
                Remediation::new("The device accepted a request that should have been rejected.")
                    .command("Show effective config", "fira config")
                    .alternative("Check the reported session limit and app foreground state."),
            ),
            Self::InvalidState { .. } | Self::UnknownSession { .. } => Some(
                Remediation::new("Session verbs were called out of order.")
                    .command("List scenarios", "fira list")
                    .alternative("Open and start a session before reconfiguring or stopping it."),
            ),
            Self::InvalidParams(_) => Some(
                Remediation::new("Fix the ranging parameters and retry.")
                    .command("Show effective config", "fira config")
                    .alternative("Short MAC addresses are 2 bytes; preamble indices are 9 to 12."),
            ),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("Check filesystem permissions and paths, then retry.")
                    .command("Show effective config", "fira config")
                    .alternative("Verify the log file directory exists and is writable."),
            ),
            Self::Json(_) => Some(
                Remediation::new("A payload could not be encoded or decoded.")
                    .command("Validate JSON", "python -m json.tool < payload.json")
                    .alternative("Check that integer codes match the FiRA constants."),
            ),
            Self::Join(_) => Some(
                Remediation::new("A disruption task panicked. Check logs for the panic and retry.")
                    .command("Re-run with debug logs", "RUST_LOG=debug fira run peer-reboot")
                    .alternative("If the panic persists, report the issue with the log."),
            ),
        }
    }

    /// Device side the failure happened on, if any.
    #[must_use]
    pub fn side(&self) -> Option<Side> {
        match self {
            Self::Timeout { side, .. }
            | Self::Api { side, .. }
            | Self::MeasurementUnavailable { side, .. }
            | Self::VerificationFailed { side, .. }
            | Self::LifecycleRejected { side, .. }
            | Self::UnexpectedSuccess { side, .. }
            | Self::InvalidState { side, .. }
            | Self::UnknownSession { side, .. } => Some(*side),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\""))
            .alternative("Ensure the file is readable by the current user."),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the syntax and retry.")
                .command("Print defaults", "fira config")
                .alternative("Start from the printed defaults and edit one section at a time."),
            Self::SerializeFailed(_) => {
                Remediation::new("Failed to serialize configuration. Check config values.")
                    .command("Print defaults", "fira config")
                    .alternative("Recreate the config from known-good defaults.")
            }
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .command("Print defaults", "fira config")
                    .alternative("Review validation errors and adjust fira.toml.")
            }
        }
    }
}

/// Format an error with its remediation block for terminal output.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error() -> ApiError {
        ApiError::new("openFiraRangingSession", "session limit reached")
    }

    #[test]
    fn remediation_available_for_error_variants() {
        let json_err = serde_json::from_str::<serde_json::Value>("").unwrap_err();
        let errors = vec![
            Error::Timeout {
                side: Side::Initiator,
                target: "session 10".to_string(),
                expected: "Opened".to_string(),
                elapsed_ms: 3000,
                last_observed: None,
            },
            Error::Api {
                side: Side::Responder,
                source: api_error(),
            },
            Error::MeasurementUnavailable {
                side: Side::Initiator,
                kind: MeasurementKind::AoaAzimuth,
                peer: UwbAddress::from([3, 4]),
            },
            Error::VerificationFailed {
                side: Side::Initiator,
                condition: "peer [3, 4] found".to_string(),
                elapsed_ms: 3000,
            },
            Error::LifecycleRejected {
                side: Side::Initiator,
                session_id: 10,
                op: "start",
                event: EventName::StartFailed,
            },
            Error::UnexpectedSuccess {
                side: Side::Responder,
                op: "open".to_string(),
            },
            Error::InvalidState {
                side: Side::Initiator,
                session_id: 10,
                state: SessionState::Closed,
                op: "start",
            },
            Error::UnknownSession {
                side: Side::Initiator,
                session_id: 99,
            },
            Error::InvalidParams("preamble".to_string()),
            Error::Config(ConfigError::FileNotFound("fira.toml".to_string())),
            Error::Config(ConfigError::ReadFailed(
                "fira.toml".to_string(),
                "io".to_string(),
            )),
            Error::Config(ConfigError::ParseFailed("parse".to_string())),
            Error::Config(ConfigError::SerializeFailed("serialize".to_string())),
            Error::Config(ConfigError::ValidationError("invalid".to_string())),
            Error::Io(std::io::Error::other("io")),
            Error::Json(json_err),
            Error::Join("task panicked".to_string()),
        ];

        for error in errors {
            let remediation = error.remediation().expect("missing remediation");
            assert!(
                !remediation.summary.is_empty(),
                "remediation summary empty for {error:?}"
            );
            assert!(
                !remediation.commands.is_empty(),
                "remediation commands empty for {error:?}"
            );
        }
    }

    #[test]
    fn timeout_message_names_side_expected_and_elapsed() {
        let err = Error::Timeout {
            side: Side::Responder,
            target: "session 10".to_string(),
            expected: "Stopped".to_string(),
            elapsed_ms: 60_000,
            last_observed: Some("ReportReceived".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("responder:"));
        assert!(msg.contains("60000ms"));
        assert!(msg.contains("Stopped"));
        assert!(msg.contains("last_observed=ReportReceived"));
        assert!(err.is_timeout());
        assert_eq!(err.side(), Some(Side::Responder));
    }

    #[test]
    fn api_error_keeps_source() {
        let err = Error::Api {
            side: Side::Initiator,
            source: api_error(),
        };
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("session limit reached"));
    }

    #[test]
    fn remediation_builder_chain() {
        let r = Remediation::new("summary")
            .command("Run", "fira list")
            .alternative("Try something else");

        assert_eq!(r.summary, "summary");
        assert_eq!(r.commands.len(), 1);
        assert_eq!(r.commands[0].label, "Run");
        assert_eq!(r.alternatives, vec!["Try something else"]);
    }

    #[test]
    fn render_plain_includes_all_sections() {
        let output = Remediation::new("Check your devices")
            .command("Diagnose", "fira config")
            .alternative("Reboot both devices")
            .render_plain();
        assert!(output.contains("To fix:"));
        assert!(output.contains("Check your devices"));
        assert!(output.contains("Diagnose: fira config"));
        assert!(output.contains("Alternatives:"));
    }

    #[test]
    fn format_error_appends_remediation() {
        let err = Error::InvalidParams("bad preamble".to_string());
        let text = format_error_with_remediation(&err);
        assert!(text.starts_with("Error: Invalid ranging params: bad preamble"));
        assert!(text.contains("To fix:"));
    }
}
