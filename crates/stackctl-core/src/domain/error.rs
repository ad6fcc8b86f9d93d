//! Error taxonomy for the control plane.
//!
//! Every fatal variant ends the current operation; `HealthTimeout` is the only
//! warning-level error and is logged rather than propagated.

use std::path::PathBuf;

use stackctl_engine::EngineError;

/// How an error affects the surrounding operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Terminates the current operation with a non-zero exit.
    Fatal,
    /// Logged; the sequence proceeds.
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Fatal => write!(f, "FATAL"),
            Severity::Warning => write!(f, "WARN"),
        }
    }
}

/// stackctl domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("container engine unavailable: {0}")]
    Environment(#[source] EngineError),

    #[error("image build failed: {0}")]
    Build(#[source] EngineError),

    #[error("service {service} failed to start: {source}")]
    Start {
        service: String,
        #[source]
        source: EngineError,
    },

    #[error("{operation} failed: {source}")]
    Engine {
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("health check for {service} timed out after {attempts} attempts ({elapsed_secs}s)")]
    HealthTimeout {
        service: String,
        attempts: u32,
        elapsed_secs: u64,
    },

    #[error("service {0} has no health endpoint")]
    NoHealthEndpoint(String),

    #[error("unknown profile '{token}' (known: {known})")]
    UnknownProfile { token: String, known: String },

    #[error("profile '{0}' has no services")]
    EmptyProfile(String),

    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("nothing to back up: none of {dirs:?} exist under {root:?}")]
    BackupTargetMissing { root: PathBuf, dirs: Vec<String> },

    #[error("backup directory must be a single top-level name, got '{0}'")]
    InvalidBackupDir(String),

    #[error("backup directory '{dir}' contains the snapshot root {root:?}")]
    BackupRootInside { dir: String, root: PathBuf },

    #[error("snapshot {id} not found at {path:?}")]
    RestoreSourceMissing { id: String, path: PathBuf },

    #[error("snapshot {0} already exists; snapshot ids have one-second resolution")]
    SnapshotExists(String),

    #[error("snapshot {id} is corrupt: {detail}")]
    SnapshotCorrupt { id: String, detail: String },

    #[error("invalid snapshot id '{0}' (expected YYYYMMDD_HHMMSS)")]
    InvalidSnapshotId(String),

    #[error("http client error: {0}")]
    Http(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StackError {
    /// Severity class of this error.
    pub fn severity(&self) -> Severity {
        match self {
            StackError::HealthTimeout { .. } => Severity::Warning,
            _ => Severity::Fatal,
        }
    }

    /// Whether the error should terminate the current operation.
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Message prefixed with its severity tag, e.g. `[FATAL] image build failed: ...`.
    pub fn tagged(&self) -> String {
        format!("[{}] {}", self.severity(), self)
    }
}

impl From<reqwest::Error> for StackError {
    fn from(err: reqwest::Error) -> Self {
        StackError::Http(err.to_string())
    }
}

/// Result type for stackctl domain operations.
pub type Result<T> = std::result::Result<T, StackError>;
