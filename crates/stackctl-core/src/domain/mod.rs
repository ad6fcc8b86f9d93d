//! Domain models for stackctl.
//!
//! Canonical definitions for the core entities:
//! - `Service`: a compose service with ports, health endpoint and criticality
//! - `HealthCheckPolicy` / `HealthCheckResult`: bounded polling inputs and outputs
//! - `BackupSnapshot`: a timestamp-identified copy of persistent directories

pub mod error;
pub mod health;
pub mod service;
pub mod snapshot;

// Re-export main types and errors
pub use error::{Result, Severity, StackError};
pub use health::{HealthCheckPolicy, HealthCheckResult, HealthOutcome};
pub use service::{Criticality, PortBinding, Service};
pub use snapshot::{
    snapshot_id_at, validate_snapshot_id, BackupSnapshot, SnapshotManifest, SnapshotSummary,
    MANIFEST_FILE, SNAPSHOT_ID_FORMAT,
};
