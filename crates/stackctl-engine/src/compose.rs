//! `docker compose` driver.
//!
//! Prefers the v2 CLI plugin and falls back to the standalone v1 binary. The
//! detected variant is cached for the lifetime of the engine value.

use crate::engine::{parse_ps_output, ContainerEngine, EngineInfo, EngineVariant, ServiceState};
use crate::error::EngineError;
use crate::process::{run_attached, run_captured, CommandSpec};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const LEGACY_PROGRAM: &str = "docker-compose";

/// Compose driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Docker CLI program (normally `docker`)
    pub program: String,
    /// Compose file, relative to `project_dir` unless absolute
    pub compose_file: PathBuf,
    /// Compose project name (`-p`)
    pub project_name: String,
    /// Directory engine commands run in
    pub project_dir: PathBuf,
    /// Deadline for non-interactive calls other than `build`
    pub command_timeout: Option<Duration>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        ComposeConfig {
            program: "docker".to_string(),
            compose_file: PathBuf::from("docker-compose.yml"),
            project_name: "qlorax".to_string(),
            project_dir: PathBuf::from("."),
            command_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Container engine backed by the docker compose CLI
pub struct ComposeEngine {
    config: ComposeConfig,
    variant: OnceLock<EngineVariant>,
}

impl ComposeEngine {
    /// Create a driver; the compose variant is detected on first
    /// [`ContainerEngine::check_available`] call.
    pub fn new(config: ComposeConfig) -> Self {
        ComposeEngine {
            config,
            variant: OnceLock::new(),
        }
    }

    /// Driver configuration
    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    fn variant(&self) -> EngineVariant {
        self.variant
            .get()
            .copied()
            .unwrap_or(EngineVariant::ComposePlugin)
    }

    /// Build a spec for `compose <global flags> <args>`.
    fn compose(&self, operation: &str, args: &[&str]) -> CommandSpec {
        self.compose_with_profile(operation, None, args)
    }

    fn compose_with_profile(
        &self,
        operation: &str,
        profile: Option<&str>,
        args: &[&str],
    ) -> CommandSpec {
        let (program, mut full_args) = match self.variant() {
            EngineVariant::ComposePlugin => (self.config.program.clone(), vec!["compose".to_string()]),
            EngineVariant::LegacyCompose => (LEGACY_PROGRAM.to_string(), Vec::new()),
        };

        full_args.push("-f".to_string());
        full_args.push(self.config.compose_file.to_string_lossy().to_string());
        full_args.push("-p".to_string());
        full_args.push(self.config.project_name.clone());
        if let Some(profile) = profile {
            full_args.push("--profile".to_string());
            full_args.push(profile.to_string());
        }
        full_args.extend(args.iter().map(|a| a.to_string()));

        CommandSpec::new(operation, program, full_args).in_dir(&self.config.project_dir)
    }

    fn bounded(&self, spec: CommandSpec) -> CommandSpec {
        match self.config.command_timeout {
            Some(timeout) => spec.with_timeout(timeout),
            None => spec,
        }
    }

    async fn run_checked(&self, spec: CommandSpec) -> Result<String> {
        let output = run_captured(&spec).await?.into_result()?;
        debug!(operation = %output.operation, duration_ms = output.duration_ms, "engine command finished");
        if !output.stdout.trim().is_empty() {
            debug!(operation = %output.operation, stdout = %output.stdout.trim(), "engine output");
        }
        Ok(output.stdout)
    }

    async fn check_daemon(&self) -> Result<()> {
        let spec = CommandSpec::new(
            "docker info",
            self.config.program.clone(),
            vec![
                "info".to_string(),
                "--format".to_string(),
                "{{.ServerVersion}}".to_string(),
            ],
        )
        .with_timeout(Duration::from_secs(30));

        let output = run_captured(&spec).await?;
        if output.success() {
            debug!(server_version = %output.stdout.trim(), "docker daemon reachable");
            Ok(())
        } else {
            Err(EngineError::Unreachable(output.stderr.trim().to_string()))
        }
    }

    async fn detect_variant(&self) -> Result<EngineInfo> {
        let plugin = CommandSpec::new(
            "docker compose version",
            self.config.program.clone(),
            vec![
                "compose".to_string(),
                "version".to_string(),
                "--short".to_string(),
            ],
        );
        if let Ok(output) = run_captured(&plugin).await {
            if output.success() {
                return Ok(EngineInfo {
                    variant: EngineVariant::ComposePlugin,
                    version: output.stdout.trim().to_string(),
                });
            }
        }

        warn!("`{} compose` unavailable, trying {}", self.config.program, LEGACY_PROGRAM);
        let legacy = CommandSpec::new(
            "docker-compose version",
            LEGACY_PROGRAM,
            vec!["version".to_string(), "--short".to_string()],
        );
        match run_captured(&legacy).await {
            Ok(output) if output.success() => Ok(EngineInfo {
                variant: EngineVariant::LegacyCompose,
                version: output.stdout.trim().to_string(),
            }),
            _ => Err(EngineError::ComposeMissing {
                program: self.config.program.clone(),
            }),
        }
    }
}

#[async_trait]
impl ContainerEngine for ComposeEngine {
    async fn check_available(&self) -> Result<EngineInfo> {
        self.check_daemon().await?;
        let info = self.detect_variant().await?;
        // A concurrent detection may have won; both saw the same binaries.
        let _ = self.variant.set(info.variant);
        info!(variant = %info.variant, version = %info.version, "container engine available");
        Ok(info)
    }

    async fn build(&self, services: &[String]) -> Result<()> {
        let mut args = vec!["build"];
        args.extend(services.iter().map(String::as_str));
        self.run_checked(self.compose("compose build", &args)).await?;
        Ok(())
    }

    async fn up(&self, service: &str) -> Result<()> {
        let spec = self.bounded(self.compose("compose up", &["up", "-d", service]));
        self.run_checked(spec).await?;
        Ok(())
    }

    async fn up_profile(&self, profile: &str) -> Result<()> {
        let spec = self.bounded(self.compose_with_profile("compose up", Some(profile), &["up", "-d"]));
        self.run_checked(spec).await?;
        Ok(())
    }

    async fn down(&self) -> Result<()> {
        let spec = self.bounded(self.compose("compose down", &["down"]));
        self.run_checked(spec).await?;
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        let spec = self.bounded(self.compose("compose restart", &["restart"]));
        self.run_checked(spec).await?;
        Ok(())
    }

    async fn ps(&self) -> Result<Vec<ServiceState>> {
        match self.variant() {
            EngineVariant::ComposePlugin => {
                let spec = self.bounded(self.compose("compose ps", &["ps", "--all", "--format", "json"]));
                let stdout = self.run_checked(spec).await?;
                parse_ps_output(&stdout)
            }
            EngineVariant::LegacyCompose => {
                // v1 has no JSON output; list the running services by name.
                let spec = self.bounded(self.compose(
                    "compose ps",
                    &["ps", "--services", "--filter", "status=running"],
                ));
                let stdout = self.run_checked(spec).await?;
                Ok(stdout
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(|name| ServiceState::new(name, "running"))
                    .collect())
            }
        }
    }

    async fn logs(&self, service: Option<&str>, follow: bool) -> Result<()> {
        let mut args = vec!["logs"];
        if follow {
            args.push("--follow");
        }
        if let Some(service) = service {
            args.push(service);
        }
        let spec = self.compose("compose logs", &args);
        let code = run_attached(&spec).await?;
        if code == 0 {
            Ok(())
        } else {
            Err(EngineError::command_failed(spec.operation, Some(code), ""))
        }
    }

    async fn exec(&self, service: &str, argv: &[String]) -> Result<i32> {
        let mut args = vec!["exec", service];
        args.extend(argv.iter().map(String::as_str));
        run_attached(&self.compose("compose exec", &args)).await
    }

    async fn run(&self, service: &str, argv: &[String]) -> Result<i32> {
        let mut args = vec!["run", "--rm", service];
        args.extend(argv.iter().map(String::as_str));
        run_attached(&self.compose("compose run", &args)).await
    }

    async fn cleanup(&self) -> Result<()> {
        let spec = self.bounded(self.compose(
            "compose down",
            &["down", "--volumes", "--remove-orphans", "--rmi", "local"],
        ));
        self.run_checked(spec).await?;
        Ok(())
    }
}
