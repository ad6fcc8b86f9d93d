//! In-memory engine fake (testing only)
//!
//! `RecordingEngine` records every call in order, tracks which services are
//! "running", and can be told to fail specific operations.

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::{ContainerEngine, EngineInfo, EngineVariant, ServiceState};
use crate::error::EngineError;
use crate::Result;

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CheckAvailable,
    Build(Vec<String>),
    Up(String),
    UpProfile(String),
    Down,
    Restart,
    Ps,
    Logs { service: Option<String>, follow: bool },
    Exec { service: String, argv: Vec<String> },
    Run { service: String, argv: Vec<String> },
    Cleanup,
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<EngineCall>,
    running: BTreeSet<String>,
}

/// Scriptable [`ContainerEngine`] that never touches a real engine.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    state: Mutex<FakeState>,
    unavailable: bool,
    fail_build: bool,
    fail_up: HashSet<String>,
    fail_down: bool,
    profile_members: Vec<String>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `check_available` fails as if docker were not installed.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// `build` exits non-zero.
    pub fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    /// `up(service)` exits non-zero for this service.
    pub fn failing_up(mut self, service: &str) -> Self {
        self.fail_up.insert(service.to_string());
        self
    }

    /// `down` exits non-zero.
    pub fn failing_down(mut self) -> Self {
        self.fail_down = true;
        self
    }

    /// Services that `up_profile` marks as running.
    pub fn with_profile_members(mut self, services: &[&str]) -> Self {
        self.profile_members = services.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Pretend these services are already up.
    pub fn with_running(self, services: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.running.extend(services.iter().map(|s| s.to_string()));
        }
        self
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Services currently marked running.
    pub fn running(&self) -> Vec<String> {
        self.state.lock().unwrap().running.iter().cloned().collect()
    }

    fn record(&self, call: EngineCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    async fn check_available(&self) -> Result<EngineInfo> {
        self.record(EngineCall::CheckAvailable);
        if self.unavailable {
            return Err(EngineError::NotInstalled {
                program: "docker".to_string(),
            });
        }
        Ok(EngineInfo {
            variant: EngineVariant::ComposePlugin,
            version: "2.24.0-fake".to_string(),
        })
    }

    async fn build(&self, services: &[String]) -> Result<()> {
        self.record(EngineCall::Build(services.to_vec()));
        if self.fail_build {
            return Err(EngineError::command_failed(
                "compose build",
                Some(1),
                "failed to solve: dockerfile parse error",
            ));
        }
        Ok(())
    }

    async fn up(&self, service: &str) -> Result<()> {
        self.record(EngineCall::Up(service.to_string()));
        if self.fail_up.contains(service) {
            return Err(EngineError::command_failed(
                "compose up",
                Some(1),
                &format!("port is already allocated for {service}"),
            ));
        }
        self.state.lock().unwrap().running.insert(service.to_string());
        Ok(())
    }

    async fn up_profile(&self, profile: &str) -> Result<()> {
        self.record(EngineCall::UpProfile(profile.to_string()));
        if self.profile_members.is_empty() {
            return Err(EngineError::command_failed(
                "compose up",
                Some(1),
                &format!("no service selected for profile {profile}"),
            ));
        }
        let mut state = self.state.lock().unwrap();
        state.running.extend(self.profile_members.iter().cloned());
        Ok(())
    }

    async fn down(&self) -> Result<()> {
        self.record(EngineCall::Down);
        if self.fail_down {
            return Err(EngineError::command_failed("compose down", Some(1), "daemon error"));
        }
        self.state.lock().unwrap().running.clear();
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        self.record(EngineCall::Restart);
        Ok(())
    }

    async fn ps(&self) -> Result<Vec<ServiceState>> {
        self.record(EngineCall::Ps);
        let state = self.state.lock().unwrap();
        Ok(state
            .running
            .iter()
            .map(|name| ServiceState::new(name.clone(), "running"))
            .collect())
    }

    async fn logs(&self, service: Option<&str>, follow: bool) -> Result<()> {
        self.record(EngineCall::Logs {
            service: service.map(str::to_string),
            follow,
        });
        Ok(())
    }

    async fn exec(&self, service: &str, argv: &[String]) -> Result<i32> {
        self.record(EngineCall::Exec {
            service: service.to_string(),
            argv: argv.to_vec(),
        });
        Ok(0)
    }

    async fn run(&self, service: &str, argv: &[String]) -> Result<i32> {
        self.record(EngineCall::Run {
            service: service.to_string(),
            argv: argv.to_vec(),
        });
        Ok(0)
    }

    async fn cleanup(&self) -> Result<()> {
        self.record(EngineCall::Cleanup);
        self.state.lock().unwrap().running.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_up_and_down_track_running_services() {
        let engine = RecordingEngine::new();
        engine.up("qlorax-api").await.unwrap();
        engine.up("qlorax-ui").await.unwrap();
        assert_eq!(engine.running(), vec!["qlorax-api", "qlorax-ui"]);

        engine.down().await.unwrap();
        assert!(engine.running().is_empty());
        assert_eq!(engine.calls().last(), Some(&EngineCall::Down));
    }

    #[tokio::test]
    async fn test_failing_up_leaves_service_stopped() {
        let engine = RecordingEngine::new().failing_up("qlorax-ui");
        assert!(engine.up("qlorax-ui").await.is_err());
        assert!(engine.running().is_empty());
    }
}
