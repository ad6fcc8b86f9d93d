//! The container engine seam.
//!
//! Everything above this crate talks to the engine through [`ContainerEngine`];
//! the real implementation is [`crate::ComposeEngine`], tests use
//! [`crate::fakes::RecordingEngine`].

use crate::error::EngineError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which compose front-end is driving the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineVariant {
    /// `docker compose` (v2 CLI plugin)
    ComposePlugin,
    /// standalone `docker-compose` (v1)
    LegacyCompose,
}

impl std::fmt::Display for EngineVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineVariant::ComposePlugin => write!(f, "docker compose"),
            EngineVariant::LegacyCompose => write!(f, "docker-compose"),
        }
    }
}

/// Result of an availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub variant: EngineVariant,
    /// Version string as reported by the compose front-end.
    pub version: String,
}

/// Observed state of one service container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Compose service name.
    #[serde(rename = "Service")]
    pub service: String,

    /// Container name.
    #[serde(rename = "Name", default)]
    pub container: String,

    /// Container state (`running`, `exited`, ...).
    #[serde(rename = "State")]
    pub state: String,

    /// Docker healthcheck status, when the image defines one.
    #[serde(rename = "Health", default)]
    pub health: Option<String>,
}

impl ServiceState {
    /// Create a state record for a service.
    pub fn new(service: impl Into<String>, state: impl Into<String>) -> Self {
        let service = service.into();
        Self {
            container: service.clone(),
            service,
            state: state.into(),
            health: None,
        }
    }

    /// Whether the container is up.
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Parse `compose ps --format json` output.
///
/// Older compose releases print one JSON array, newer ones print one object
/// per line; both are accepted. Empty output means no containers.
pub fn parse_ps_output(raw: &str) -> Result<Vec<ServiceState>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| EngineError::Parse(e.to_string()));
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| EngineError::Parse(e.to_string())))
        .collect()
}

/// Primitives the control plane consumes from a container engine.
///
/// Every method blocks until the engine returns. Service names are compose
/// service names; naming a service explicitly activates it regardless of the
/// profile it belongs to.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Verify the engine is installed and reachable.
    async fn check_available(&self) -> Result<EngineInfo>;

    /// Build images. An empty slice builds the default service set.
    async fn build(&self, services: &[String]) -> Result<()>;

    /// Bring one service up detached.
    async fn up(&self, service: &str) -> Result<()>;

    /// Bring up everything activated by `profile` detached.
    async fn up_profile(&self, profile: &str) -> Result<()>;

    /// Stop and remove the stack's containers.
    async fn down(&self) -> Result<()>;

    /// Restart every running service.
    async fn restart(&self) -> Result<()>;

    /// List containers belonging to the stack.
    async fn ps(&self) -> Result<Vec<ServiceState>>;

    /// Stream logs to the terminal.
    async fn logs(&self, service: Option<&str>, follow: bool) -> Result<()>;

    /// Run `argv` inside an already running service container.
    async fn exec(&self, service: &str, argv: &[String]) -> Result<i32>;

    /// Run `argv` in a fresh, removed-on-exit container for `service`.
    async fn run(&self, service: &str, argv: &[String]) -> Result<i32>;

    /// Remove containers, volumes, locally built images and orphans.
    async fn cleanup(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ps_accepts_json_array() {
        let raw = r#"[{"Service":"qlorax-api","Name":"qlorax-api-1","State":"running","Health":"healthy"}]"#;
        let states = parse_ps_output(raw).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].service, "qlorax-api");
        assert_eq!(states[0].health.as_deref(), Some("healthy"));
        assert!(states[0].is_running());
    }

    #[test]
    fn parse_ps_accepts_ndjson() {
        let raw = "{\"Service\":\"qlorax-api\",\"Name\":\"a\",\"State\":\"running\"}\n{\"Service\":\"qlorax-ui\",\"Name\":\"b\",\"State\":\"exited\"}\n";
        let states = parse_ps_output(raw).unwrap();
        assert_eq!(states.len(), 2);
        assert!(!states[1].is_running());
    }

    #[test]
    fn parse_ps_empty_output_is_no_containers() {
        assert!(parse_ps_output("  \n").unwrap().is_empty());
    }

    #[test]
    fn parse_ps_rejects_garbage() {
        let err = parse_ps_output("not json").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }
}
