//! Error taxonomy for Juju orchestration

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = JujuError> = std::result::Result<T, E>;

/// Errors raised while driving the `juju` CLI
#[derive(Debug, Error)]
pub enum JujuError {
    /// Target environment or service is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// The environment's API server could not be reached
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The wrapped CLI exited non-zero
    #[error("{output}\nCOMMAND: {command}")]
    Execution { command: String, output: String },

    /// One or more concurrent sub-operations failed
    #[error("{} of {total} operations failed:\n{}", .errors.len(), summarize(.errors))]
    Aggregate { total: usize, errors: Vec<JujuError> },

    /// `wait_until` exceeded its deadline
    #[error("timed out after {}s waiting for {service} to report '{target}'", .elapsed.as_secs())]
    Timeout {
        service: String,
        target: String,
        elapsed: Duration,
    },

    /// `wait_until` was cancelled through its token
    #[error("wait for {0} was cancelled")]
    Cancelled(String),

    #[error("environment '{0}' already exists")]
    AlreadyExists(String),

    /// A required field is missing from an environment's state file
    #[error("environment '{environment}' has no {field} in its state file")]
    MissingState { environment: String, field: String },

    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("invalid export token: {0}")]
    InvalidToken(String),

    /// The CLI binary could not be started at all
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
}

impl JujuError {
    /// Stable kebab-case tag for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::Unreachable(_) => "unreachable",
            Self::Execution { .. } => "execution",
            Self::Aggregate { .. } => "aggregate",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::AlreadyExists(_) => "already-exists",
            Self::MissingState { .. } => "missing-state",
            Self::InvalidBundle(_) => "invalid-bundle",
            Self::InvalidToken(_) => "invalid-token",
            Self::Spawn { .. } => "spawn",
            Self::Io(_) => "io",
            Self::Yaml(_) => "yaml",
            Self::Json(_) => "json",
            Self::Base64(_) => "base64",
        }
    }

    /// True only for the "absent" case; unreachable environments are not
    /// reported as not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

fn summarize(errors: &[JujuError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - [{}] {e}", e.kind()))
        .collect::<Vec<_>>()
        .join("\n")
}
