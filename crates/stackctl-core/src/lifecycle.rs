//! Lifecycle controller: build, start, health-wait, stop, restart, status.
//!
//! Failure policy is fail-fast with no rollback. A failed build aborts before
//! anything starts. A service that fails to start aborts the operation but
//! leaves its already-started siblings running. Health waits after `start`
//! are advisory: timeouts are logged and reported, never returned as errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use stackctl_engine::{ContainerEngine, EngineError, EngineInfo};
use tracing::{info, warn, Instrument};

use crate::config::StackConfig;
use crate::domain::{HealthCheckResult, Result, StackError};
use crate::health::{HealthProber, ProbeOutcome};
use crate::obs;
use crate::profile::{ProfileComposer, ServiceSet, API_SERVICE};

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Uninitialized,
    Building,
    Starting,
    Running,
    Stopping,
    Stopped,
    Restarting,
}

impl LifecyclePhase {
    /// Whether `self -> next` is a legal transition.
    ///
    /// `Uninitialized` may also go to `Stopping`/`Restarting`/`Starting`:
    /// a fresh process has not observed the stack and must still be able to
    /// stop or restart what a previous invocation left running.
    pub fn can_transition_to(self, next: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, next),
            (Uninitialized | Stopped | Running, Building)
                | (Uninitialized | Building | Stopped | Running, Starting)
                | (Starting | Restarting, Running)
                | (Uninitialized | Running, Stopping)
                | (Stopping, Stopped)
                | (Uninitialized | Running | Stopped, Restarting)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Uninitialized => "uninitialized",
            LifecyclePhase::Building => "building",
            LifecyclePhase::Starting => "starting",
            LifecyclePhase::Running => "running",
            LifecyclePhase::Stopping => "stopping",
            LifecyclePhase::Stopped => "stopped",
            LifecyclePhase::Restarting => "restarting",
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `start` did.
#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub profile: String,
    /// Services (or the forwarded profile token) brought up, in order.
    pub started: Vec<String>,
    pub health: Vec<HealthCheckResult>,
}

impl StartReport {
    /// Results that did not reach Ready.
    pub fn timed_out(&self) -> impl Iterator<Item = &HealthCheckResult> {
        self.health.iter().filter(|r| !r.is_ready())
    }

    /// Warning-level errors raised during the health wait.
    pub fn warnings(&self) -> Vec<StackError> {
        self.timed_out()
            .map(|r| StackError::HealthTimeout {
                service: r.service().to_string(),
                attempts: r.attempts_used(),
                elapsed_secs: r.elapsed().as_secs(),
            })
            .collect()
    }
}

/// Whether `stop` had anything to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

/// What `restart` did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RestartOutcome {
    /// Running containers were restarted.
    InPlace,
    /// Nothing was running; the default profile was started.
    Recreated(StartReport),
}

/// One row of `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub up: bool,
    /// Engine-reported state, `absent` when no container exists.
    pub state: String,
}

/// Output of `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub phase: LifecyclePhase,
    pub services: Vec<ServiceStatus>,
    pub primary_endpoint: String,
    pub primary_probe: ProbeOutcome,
}

impl StatusReport {
    pub fn running_count(&self) -> usize {
        self.services.iter().filter(|s| s.up).count()
    }
}

/// Something that can bring the stack down before state is replaced.
#[async_trait]
pub trait ServiceStopper: Send {
    async fn stop_services(&mut self) -> Result<()>;
}

/// Sequences engine calls for the stack.
pub struct LifecycleController {
    config: StackConfig,
    engine: Arc<dyn ContainerEngine>,
    composer: ProfileComposer,
    prober: HealthProber,
    phase: LifecyclePhase,
    engine_info: Option<EngineInfo>,
}

impl LifecycleController {
    pub fn new(config: StackConfig, engine: Arc<dyn ContainerEngine>, prober: HealthProber) -> Self {
        let composer = ProfileComposer::new(&config);
        Self {
            config,
            engine,
            composer,
            prober,
            phase: LifecyclePhase::Uninitialized,
            engine_info: None,
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn composer(&self) -> &ProfileComposer {
        &self.composer
    }

    fn transition(&mut self, next: LifecyclePhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(StackError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        obs::emit_phase_changed(self.phase.as_str(), next.as_str());
        self.phase = next;
        Ok(())
    }

    /// Verify the engine once per controller; fatal before any state change.
    pub async fn ensure_engine(&mut self) -> Result<EngineInfo> {
        if let Some(info) = &self.engine_info {
            return Ok(info.clone());
        }
        let info = self
            .engine
            .check_available()
            .await
            .map_err(StackError::Environment)?;
        self.engine_info = Some(info.clone());
        Ok(info)
    }

    /// `build` then `start`. A build failure means nothing is started.
    pub async fn setup(&mut self, profile: Option<&str>) -> Result<StartReport> {
        let span = obs::operation_span("setup", &self.config.project_name);
        async move {
            let before = self.phase;
            self.ensure_engine().await?;
            self.composer.resolve(profile)?;
            self.build_images().await?;
            let result = self.start_inner(profile).await;
            if result.is_err() {
                self.phase = before;
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Build images; the phase returns to where it was on success.
    pub async fn build(&mut self) -> Result<()> {
        let span = obs::operation_span("build", &self.config.project_name);
        let prior = self.phase;
        self.build_images().instrument(span).await?;
        self.phase = prior;
        Ok(())
    }

    async fn build_images(&mut self) -> Result<()> {
        self.ensure_engine().await?;
        let prior = self.phase;
        self.transition(LifecyclePhase::Building)?;
        obs::emit_build("images", None);

        let started = std::time::Instant::now();
        if let Err(err) = self.engine.build(&[]).await {
            self.phase = prior;
            return Err(StackError::Build(err));
        }

        obs::emit_build("images", Some(started.elapsed().as_millis() as u64));
        Ok(())
    }

    /// Bring up a profile and wait (advisorily) on its health endpoints.
    pub async fn start(&mut self, profile: Option<&str>) -> Result<StartReport> {
        let span = obs::operation_span("start", &self.config.project_name);
        self.start_inner(profile).instrument(span).await
    }

    async fn start_inner(&mut self, profile: Option<&str>) -> Result<StartReport> {
        self.ensure_engine().await?;
        let set = self.composer.resolve(profile)?;
        // Reached from Building during setup; otherwise from the phase on entry.
        let prior = match self.phase {
            LifecyclePhase::Building => LifecyclePhase::Stopped,
            phase => phase,
        };
        self.transition(LifecyclePhase::Starting)?;

        let started = match self.bring_up(&set).await {
            Ok(started) => started,
            Err(err) => {
                self.phase = prior;
                return Err(err);
            }
        };
        self.transition(LifecyclePhase::Running)?;

        let health = self.await_health(&set).await?;
        Ok(StartReport {
            profile: set.profile().to_string(),
            started,
            health,
        })
    }

    async fn bring_up(&self, set: &ServiceSet) -> Result<Vec<String>> {
        if !set.is_registered() {
            let token = set.profile();
            warn!(profile = %token, "profile not in local registry; forwarding to the engine");
            self.engine
                .up_profile(token)
                .await
                .map_err(|source| StackError::Start {
                    service: format!("profile:{token}"),
                    source,
                })?;
            obs::emit_service_started(token);
            return Ok(vec![token.to_string()]);
        }

        let mut started = Vec::with_capacity(set.services().len());
        for service in set.services() {
            // No compensating shutdown: siblings already up stay up.
            self.engine
                .up(service.name())
                .await
                .map_err(|source| StackError::Start {
                    service: service.name().to_string(),
                    source,
                })?;
            obs::emit_service_started(service.name());
            started.push(service.name().to_string());
        }
        Ok(started)
    }

    async fn await_health(&self, set: &ServiceSet) -> Result<Vec<HealthCheckResult>> {
        let mut results = Vec::new();
        for service in set.services().iter().filter(|s| s.health_endpoint().is_some()) {
            let policy = self.config.policy_for(service.criticality());
            info!(
                service = %service.name(),
                max_attempts = policy.max_attempts,
                interval_secs = policy.interval.as_secs(),
                "waiting for service health"
            );
            let result = self.prober.poll(service, &policy).await?;
            obs::emit_health_result(&result);
            results.push(result);
        }
        Ok(results)
    }

    /// Stop the stack. Idempotent: a stopped stack is left alone.
    pub async fn stop(&mut self) -> Result<StopOutcome> {
        let span = obs::operation_span("stop", &self.config.project_name);
        self.stop_inner().instrument(span).await
    }

    async fn stop_inner(&mut self) -> Result<StopOutcome> {
        if self.phase == LifecyclePhase::Stopped {
            info!("stack already stopped");
            return Ok(StopOutcome::AlreadyStopped);
        }
        self.ensure_engine().await?;

        if self.phase == LifecyclePhase::Uninitialized {
            match self.engine.ps().await {
                Ok(states) if !states.iter().any(|s| s.is_running()) => {
                    info!("no running services; nothing to stop");
                    self.phase = LifecyclePhase::Stopped;
                    return Ok(StopOutcome::AlreadyStopped);
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "could not list services; stopping anyway"),
            }
        }

        let prior = self.phase;
        self.transition(LifecyclePhase::Stopping)?;
        if let Err(source) = self.engine.down().await {
            self.phase = prior;
            return Err(engine_failure("stop", source));
        }
        self.transition(LifecyclePhase::Stopped)?;
        Ok(StopOutcome::Stopped)
    }

    /// Restart the stack.
    ///
    /// Running containers are restarted in place. A stack with nothing
    /// running (after `stop`, or never started) is brought up again with the
    /// default profile and the usual advisory health wait.
    pub async fn restart(&mut self) -> Result<RestartOutcome> {
        let span = obs::operation_span("restart", &self.config.project_name);
        self.restart_inner().instrument(span).await
    }

    async fn restart_inner(&mut self) -> Result<RestartOutcome> {
        self.ensure_engine().await?;
        let any_running = match self.phase {
            LifecyclePhase::Stopped => false,
            _ => match self.engine.ps().await {
                Ok(states) => states.iter().any(|s| s.is_running()),
                Err(err) => {
                    warn!(error = %err, "could not list services; restarting in place");
                    true
                }
            },
        };
        let set = self.composer.resolve(None)?;

        let prior = self.phase;
        self.transition(LifecyclePhase::Restarting)?;
        if any_running {
            if let Err(source) = self.engine.restart().await {
                self.phase = prior;
                return Err(engine_failure("restart", source));
            }
            self.transition(LifecyclePhase::Running)?;
            return Ok(RestartOutcome::InPlace);
        }

        info!("no running services; bringing the stack up");
        let started = match self.bring_up(&set).await {
            Ok(started) => started,
            Err(err) => {
                self.phase = prior;
                return Err(err);
            }
        };
        self.transition(LifecyclePhase::Running)?;
        let health = self.await_health(&set).await?;
        Ok(RestartOutcome::Recreated(StartReport {
            profile: set.profile().to_string(),
            started,
            health,
        }))
    }

    /// Per-service up/down plus one probe of the primary endpoint (no retry).
    pub async fn status(&mut self) -> Result<StatusReport> {
        self.ensure_engine().await?;
        let states = self
            .engine
            .ps()
            .await
            .map_err(|source| engine_failure("status", source))?;

        let base = self.composer.resolve(None)?;
        let mut services: Vec<ServiceStatus> = base
            .services()
            .iter()
            .map(|svc| {
                let state = states.iter().find(|s| s.service == svc.name());
                ServiceStatus {
                    service: svc.name().to_string(),
                    up: state.is_some_and(|s| s.is_running()),
                    state: state.map_or_else(|| "absent".to_string(), |s| s.state.clone()),
                }
            })
            .collect();
        for extra in states.iter().filter(|s| !base.names().contains(&s.service)) {
            services.push(ServiceStatus {
                service: extra.service.clone(),
                up: extra.is_running(),
                state: extra.state.clone(),
            });
        }

        let primary_endpoint = base
            .primary()
            .and_then(|s| s.health_endpoint())
            .map_or_else(|| self.config.primary_health_url(), str::to_string);
        let primary_probe = self.prober.check_once(&primary_endpoint).await;

        Ok(StatusReport {
            phase: self.phase,
            services,
            primary_endpoint,
            primary_probe,
        })
    }

    /// Stream logs for one service or the whole stack.
    pub async fn logs(&mut self, service: Option<&str>, follow: bool) -> Result<()> {
        self.ensure_engine().await?;
        self.engine
            .logs(service, follow)
            .await
            .map_err(|source| engine_failure("logs", source))
    }

    /// Run the training job in a one-off API container.
    pub async fn train(&mut self, args: &[String]) -> Result<i32> {
        self.run_task("train", args).await
    }

    /// Run the demo pipeline in a one-off API container.
    pub async fn demo(&mut self, args: &[String]) -> Result<i32> {
        self.run_task("demo", args).await
    }

    async fn run_task(&mut self, token: &str, args: &[String]) -> Result<i32> {
        self.ensure_engine().await?;
        let mut argv = vec![token.to_string()];
        argv.extend(args.iter().cloned());
        self.engine
            .run(API_SERVICE, &argv)
            .await
            .map_err(|source| engine_failure("run", source))
    }

    /// Interactive shell inside the running API container.
    pub async fn shell(&mut self) -> Result<i32> {
        self.ensure_engine().await?;
        self.engine
            .exec(API_SERVICE, &["/bin/bash".to_string()])
            .await
            .map_err(|source| engine_failure("shell", source))
    }

    /// Remove containers, volumes and locally built images.
    pub async fn cleanup(&mut self) -> Result<()> {
        let span = obs::operation_span("cleanup", &self.config.project_name);
        self.ensure_engine().await?;
        self.engine
            .cleanup()
            .instrument(span)
            .await
            .map_err(|source| engine_failure("cleanup", source))?;
        self.phase = LifecyclePhase::Stopped;
        Ok(())
    }
}

/// An engine that went missing mid-operation is an environment problem, not
/// a failed command.
fn engine_failure(operation: &'static str, source: EngineError) -> StackError {
    if source.is_environment() {
        StackError::Environment(source)
    } else {
        StackError::Engine { operation, source }
    }
}

#[async_trait]
impl ServiceStopper for LifecycleController {
    async fn stop_services(&mut self) -> Result<()> {
        self.stop().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecyclePhase::*;

    #[test]
    fn test_documented_transitions_are_legal() {
        for (from, to) in [
            (Uninitialized, Building),
            (Building, Starting),
            (Starting, Running),
            (Running, Stopping),
            (Stopping, Stopped),
            (Running, Restarting),
            (Stopped, Restarting),
            (Restarting, Running),
        ] {
            assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
        }
    }

    #[test]
    fn test_engine_failures_split_environment_from_refusal() {
        let gone = engine_failure("status", EngineError::Unreachable("no socket".to_string()));
        assert!(matches!(gone, StackError::Environment(_)));

        let refused = engine_failure(
            "stop",
            EngineError::command_failed("compose down", Some(1), "daemon error"),
        );
        assert!(matches!(refused, StackError::Engine { operation: "stop", .. }));
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        for (from, to) in [
            (Stopped, Stopping),
            (Building, Running),
            (Stopping, Running),
            (Restarting, Stopped),
            (Uninitialized, Running),
        ] {
            assert!(!from.can_transition_to(to), "{from} -> {to} should be illegal");
        }
    }
}
