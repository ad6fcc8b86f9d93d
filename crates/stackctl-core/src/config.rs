//! Control-plane configuration.
//!
//! One `StackConfig` value is built at process start (environment first, then
//! CLI overrides) and passed to every component. Nothing below this module
//! reads the process environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stackctl_engine::ComposeConfig;
use tracing::warn;

use crate::domain::{Criticality, HealthCheckPolicy};

pub const ENV_MODE: &str = "QLORAX_ENV";
pub const ENV_API_HOST: &str = "QLORAX_API_HOST";
pub const ENV_API_PORT: &str = "QLORAX_API_PORT";
pub const ENV_UI_PORT: &str = "QLORAX_UI_PORT";
pub const ENV_PROBE_HOST: &str = "QLORAX_PROBE_HOST";
pub const ENV_COMPOSE_FILE: &str = "QLORAX_COMPOSE_FILE";
pub const ENV_PROJECT: &str = "QLORAX_PROJECT";
pub const ENV_BACKUP_DIR: &str = "QLORAX_BACKUP_DIR";
pub const ENV_STRICT_PROFILES: &str = "QLORAX_STRICT_PROFILES";

/// Directories captured by `backup` when none are named.
pub const DEFAULT_BACKUP_DIRS: [&str; 4] = ["data", "models", "outputs", "configs"];

/// Configuration threaded through every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Repository root; compose runs here and persistent directories live here.
    pub project_dir: PathBuf,
    /// Compose file, relative to `project_dir` unless absolute.
    pub compose_file: PathBuf,
    /// Compose project name.
    pub project_name: String,
    /// Docker CLI program.
    pub engine_program: String,
    /// Deployment mode handed to the services (`production`, `development`).
    pub environment: String,
    /// Bind address of the API inside its container.
    pub api_host: String,
    /// Published API port.
    pub api_port: u16,
    /// Published UI port.
    pub ui_port: u16,
    /// Host the control plane uses to reach published ports.
    pub probe_host: String,
    /// Snapshot root, relative to `project_dir` unless absolute.
    pub backup_root: PathBuf,
    /// Top-level directories captured by `backup`.
    pub backup_dirs: Vec<String>,
    pub primary_policy: HealthCheckPolicy,
    pub secondary_policy: HealthCheckPolicy,
    /// Deadline for a single health request.
    pub probe_timeout: Duration,
    /// Reject profile tokens missing from the registry instead of forwarding them.
    pub strict_profiles: bool,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            project_dir: PathBuf::from("."),
            compose_file: PathBuf::from("docker-compose.yml"),
            project_name: "qlorax".to_string(),
            engine_program: "docker".to_string(),
            environment: "production".to_string(),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            ui_port: 7860,
            probe_host: "localhost".to_string(),
            backup_root: PathBuf::from("backups"),
            backup_dirs: DEFAULT_BACKUP_DIRS.iter().map(|d| d.to_string()).collect(),
            primary_policy: HealthCheckPolicy::primary(),
            secondary_policy: HealthCheckPolicy::secondary(),
            probe_timeout: Duration::from_secs(5),
            strict_profiles: false,
        }
    }
}

impl StackConfig {
    /// Build from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = StackConfig::default();

        if let Some(mode) = lookup(ENV_MODE) {
            config.environment = mode;
        }
        if let Some(host) = lookup(ENV_API_HOST) {
            config.api_host = host;
        }
        if let Some(port) = parse_port(ENV_API_PORT, lookup(ENV_API_PORT)) {
            config.api_port = port;
        }
        if let Some(port) = parse_port(ENV_UI_PORT, lookup(ENV_UI_PORT)) {
            config.ui_port = port;
        }
        if let Some(host) = lookup(ENV_PROBE_HOST) {
            config.probe_host = host;
        }
        if let Some(file) = lookup(ENV_COMPOSE_FILE) {
            config.compose_file = PathBuf::from(file);
        }
        if let Some(project) = lookup(ENV_PROJECT) {
            config.project_name = project;
        }
        if let Some(dir) = lookup(ENV_BACKUP_DIR) {
            config.backup_root = PathBuf::from(dir);
        }
        if let Some(flag) = lookup(ENV_STRICT_PROFILES) {
            config.strict_profiles =
                matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// Root under which the project lives.
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    /// Absolute-or-project-relative snapshot root.
    pub fn backup_root_path(&self) -> PathBuf {
        if self.backup_root.is_absolute() {
            self.backup_root.clone()
        } else {
            self.project_dir.join(&self.backup_root)
        }
    }

    /// `GET /health` on the published API port.
    pub fn primary_health_url(&self) -> String {
        format!("http://{}:{}/health", self.probe_host, self.api_port)
    }

    /// `GET /` on the published UI port (liveness only).
    pub fn ui_url(&self) -> String {
        format!("http://{}:{}/", self.probe_host, self.ui_port)
    }

    /// Polling policy for a criticality class.
    pub fn policy_for(&self, criticality: Criticality) -> HealthCheckPolicy {
        match criticality {
            Criticality::Primary => self.primary_policy,
            Criticality::Secondary => self.secondary_policy,
        }
    }

    /// Settings for the compose driver.
    pub fn compose_config(&self) -> ComposeConfig {
        ComposeConfig {
            program: self.engine_program.clone(),
            compose_file: self.compose_file.clone(),
            project_name: self.project_name.clone(),
            project_dir: self.project_dir.clone(),
            ..ComposeConfig::default()
        }
    }
}

fn parse_port(key: &str, raw: Option<String>) -> Option<u16> {
    let raw = raw?;
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Some(port),
        _ => {
            warn!("ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}
