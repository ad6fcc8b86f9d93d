//! stackctl Core Library
//!
//! Control-plane logic for a docker-compose managed model-serving stack:
//! profile resolution, lifecycle sequencing, bounded health polling,
//! snapshot/restore of persistent directories, and container entrypoint
//! dispatch. The container engine itself sits behind
//! [`stackctl_engine::ContainerEngine`].

pub mod backup;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod health;
pub mod lifecycle;
pub mod obs;
pub mod profile;
pub mod telemetry;

pub use backup::BackupManager;
pub use config::{StackConfig, DEFAULT_BACKUP_DIRS};
pub use dispatch::{Action, Command, LaunchPlan};
pub use domain::{
    BackupSnapshot, Criticality, HealthCheckPolicy, HealthCheckResult, HealthOutcome, PortBinding,
    Result, Service, Severity, SnapshotManifest, SnapshotSummary, StackError,
};
pub use health::{HealthProbe, HealthProber, HttpProbe, ProbeOutcome};
pub use lifecycle::{
    LifecycleController, LifecyclePhase, RestartOutcome, ServiceStatus, ServiceStopper,
    StartReport, StatusReport, StopOutcome,
};
pub use profile::{Profile, ProfileComposer, ServiceSet, KNOWN_PROFILES};
pub use telemetry::init_tracing;

/// Crate version, reported by `stackctl info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
