//! Error types for freqfleet

use crate::container::StatusReport;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for freqfleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Broad error classes used by callers to pick a recovery strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// An invariant would be violated; nothing was changed
    Validation,
    /// The request does not fit the current state
    State,
    /// The container runtime failed or did not answer in time
    Runtime,
    /// Writing the compose file failed; the previous file is intact
    Persistence,
    /// Plumbing failures (I/O, decoding, poisoned locks)
    Internal,
}

/// freqfleet error types
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Name already in use: {0}")]
    DuplicateName(String),

    #[error("Host port {port}/{protocol} is already bound by service '{owner}'")]
    PortConflict {
        port: u16,
        protocol: String,
        owner: String,
    },

    #[error("Service '{service}' references unknown network '{network}'")]
    UnknownNetwork { service: String, network: String },

    #[error("Network '{network}' is in use by: {}", .services.join(", "))]
    NetworkInUse {
        network: String,
        services: Vec<String>,
    },

    #[error("Volume '{volume}' is in use by: {}", .services.join(", "))]
    VolumeInUse {
        volume: String,
        services: Vec<String>,
    },

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Template is missing required field: {0}")]
    MissingRequiredField(String),

    #[error("Invalid compose document: {0}")]
    DocumentInvalid(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Container already exists: {0}")]
    AlreadyExists(String),

    #[error("Container still running: {0}")]
    StillRunning(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Service '{service}' is in error state ({reason}); check its status before retrying")]
    StatusCheckRequired { service: String, reason: String },

    #[error("Container runtime unavailable: {reason}")]
    RuntimeUnavailable {
        reason: String,
        /// Last cached status, always flagged stale
        last_known: Option<Box<StatusReport>>,
    },

    #[error("Timeout: {operation} on '{service}' did not finish within {after:?}")]
    Timeout {
        operation: String,
        service: String,
        after: Duration,
    },

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("No {count} free port(s) at or above {preferred}")]
    PortRangeExhausted { preferred: u16, count: usize },

    #[error("Failed to persist {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl FleetError {
    /// Classify the error
    pub fn class(&self) -> ErrorClass {
        match self {
            FleetError::DuplicateName(_)
            | FleetError::PortConflict { .. }
            | FleetError::UnknownNetwork { .. }
            | FleetError::NetworkInUse { .. }
            | FleetError::VolumeInUse { .. }
            | FleetError::InvalidTemplate(_)
            | FleetError::MissingRequiredField(_)
            | FleetError::DocumentInvalid(_)
            | FleetError::InvalidConfig(_) => ErrorClass::Validation,
            FleetError::AlreadyExists(_)
            | FleetError::StillRunning(_)
            | FleetError::ServiceNotFound(_)
            | FleetError::NetworkNotFound(_)
            | FleetError::VolumeNotFound(_)
            | FleetError::StatusCheckRequired { .. } => ErrorClass::State,
            FleetError::RuntimeUnavailable { .. }
            | FleetError::Timeout { .. }
            | FleetError::Runtime(_)
            | FleetError::PortRangeExhausted { .. } => ErrorClass::Runtime,
            FleetError::Persistence { .. } => ErrorClass::Persistence,
            FleetError::Io(_) | FleetError::Json(_) | FleetError::Yaml(_) | FleetError::Lock(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// freqfleet never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::RuntimeUnavailable { .. } | FleetError::Timeout { .. }
        )
    }
}

impl From<serde_yaml::Error> for FleetError {
    fn from(e: serde_yaml::Error) -> Self {
        FleetError::Yaml(e.to_string())
    }
}
