//! Bootstrap error types
//!
//! Caller-facing errors for orchestrator operations, plus the typed failures
//! of the collaborators (config file, launcher) and the classified reasons a
//! bootstrap session can end in `Failed`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::BootstrapStep;

/// Result type alias for orchestrator operations
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Errors returned to the caller of the orchestrator.
///
/// Apart from `Cancelled`, which returns the session to `Idle`, an operation
/// that returns `Err` leaves the session and the stored config as they were.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Operation is not legal from the session's current step
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: BootstrapStep,
        to: BootstrapStep,
    },

    /// A submitted draft is missing required fields
    #[error("Incomplete {form} form: {message}")]
    IncompleteForm {
        form: &'static str,
        message: String,
    },

    /// An attempt is still in flight on this orchestrator
    #[error("A bootstrap attempt is already in progress")]
    AlreadyRunning,

    /// The session was torn down while an attempt was in flight
    #[error("Bootstrap attempt cancelled")]
    Cancelled,

    /// History entry index out of range
    #[error("No history entry at index {index} (history has {len} entries)")]
    HistoryEntryNotFound { index: usize, len: usize },

    /// Persisting the node config failed
    #[error("Failed to persist node config to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BootstrapError {
    /// Create an invalid transition error
    pub fn invalid_transition(from: BootstrapStep, to: BootstrapStep) -> Self {
        Self::InvalidStateTransition { from, to }
    }

    /// Create an incomplete form error
    pub fn incomplete(form: &'static str, message: impl Into<String>) -> Self {
        Self::IncompleteForm {
            form,
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }
}

/// Reasons the persisted node config could not be read.
///
/// `NodeConfigStore::load` never returns these; it logs them and falls back
/// to the zero-value config. `load_strict` exposes them for diagnostics.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Node config not found at {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read node config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Node config at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by a node launcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The node rejected the supplied password (local key material locked)
    #[error("Node rejected credentials: {0}")]
    Authentication(String),

    /// The node process could not be spawned
    #[error("Failed to spawn node: {0}")]
    Spawn(String),

    /// The node process exited before becoming ready
    #[error("Node exited with status {code:?}")]
    Exited { code: Option<i32> },

    /// Anything else the launcher could not classify
    #[error("Node launcher error: {0}")]
    Other(String),
}

impl LaunchError {
    /// Whether the failure is attributable to the user's password input
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Classified cause of a failed bootstrap session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// Internal node rejected the password
    InternalPassword,
    /// Internal node failed to start or never came up
    InternalUnknown,
    /// External endpoint never answered within the probe budget
    ExternalUnknown,
}

impl FailureReason {
    /// Stable machine-readable code
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InternalPassword => "internal-password",
            Self::InternalUnknown => "internal-unknown",
            Self::ExternalUnknown => "external-unknown",
        }
    }

    /// Human-readable message for the failure screen
    pub fn message(self) -> &'static str {
        match self {
            Self::InternalPassword => "The password does not unlock this node",
            Self::InternalUnknown => "The node failed to start",
            Self::ExternalUnknown => "Could not connect to the external node",
        }
    }

    /// Whether the user should re-enter input rather than retry blindly
    pub fn needs_new_input(self) -> bool {
        matches!(self, Self::InternalPassword)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
