//! Bounded health polling.
//!
//! [`HealthProber::poll`] issues one GET per tick and sleeps a fixed interval
//! between failures. No backoff, no jitter. The loop ends on the first 2xx,
//! after `max_attempts` ticks, or at the policy ceiling
//! (`max_attempts × interval`), whichever comes first. A slow request is cut
//! off at the ceiling rather than extending it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{
    HealthCheckPolicy, HealthCheckResult, HealthOutcome, Result, Service, StackError,
};

/// Result of a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// 2xx response.
    Healthy { status: u16 },
    /// Any other HTTP status.
    Unhealthy { status: u16 },
    /// Connection refused, DNS failure, request timeout.
    Unreachable { reason: String },
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy { .. })
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            ProbeOutcome::Healthy { status }
        } else {
            ProbeOutcome::Unhealthy { status }
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Healthy { status } => write!(f, "healthy ({status})"),
            ProbeOutcome::Unhealthy { status } => write!(f, "unhealthy ({status})"),
            ProbeOutcome::Unreachable { reason } => write!(f, "unreachable ({reason})"),
        }
    }
}

/// One HTTP GET against an endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// [`HealthProbe`] over reqwest.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stackctl/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        match self.client.get(url).send().await {
            Ok(response) => ProbeOutcome::from_status(response.status().as_u16()),
            Err(err) => ProbeOutcome::Unreachable {
                reason: err.to_string(),
            },
        }
    }
}

/// Polls service endpoints under a [`HealthCheckPolicy`].
#[derive(Clone)]
pub struct HealthProber {
    probe: Arc<dyn HealthProbe>,
}

impl HealthProber {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self { probe }
    }

    /// Poll until ready or out of attempts.
    ///
    /// Fails only if the service has no health endpoint; a timeout is a
    /// normal `TimedOut` result, never an error.
    pub async fn poll(
        &self,
        service: &Service,
        policy: &HealthCheckPolicy,
    ) -> Result<HealthCheckResult> {
        let url = service
            .health_endpoint()
            .ok_or_else(|| StackError::NoHealthEndpoint(service.name().to_string()))?;

        let started = Instant::now();
        let deadline = started + policy.ceiling();
        let mut attempts = 0u32;

        while attempts < policy.max_attempts {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = match tokio::time::timeout(remaining, self.probe.probe(url)).await {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome::Unreachable {
                    reason: "request cut off at the polling deadline".to_string(),
                },
            };
            if outcome.is_healthy() {
                return Ok(HealthCheckResult::new(
                    service.name(),
                    url,
                    policy.criticality,
                    HealthOutcome::Ready,
                    attempts,
                    started.elapsed(),
                ));
            }
            debug!(
                service = %service.name(),
                attempt = attempts,
                max_attempts = policy.max_attempts,
                outcome = %outcome,
                "not ready yet"
            );
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(policy.interval.min(deadline - now)).await;
        }

        Ok(HealthCheckResult::new(
            service.name(),
            url,
            policy.criticality,
            HealthOutcome::TimedOut,
            attempts,
            started.elapsed(),
        ))
    }

    /// One request, no retry.
    pub async fn check_once(&self, url: &str) -> ProbeOutcome {
        self.probe.probe(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Criticality;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns 503 until the `ready_on`-th call, then 200.
    struct ScriptedProbe {
        ready_on: Option<u32>,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(ready_on: Option<u32>) -> Arc<Self> {
            Arc::new(Self {
                ready_on,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, _url: &str) -> ProbeOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.ready_on {
                Some(k) if n >= k => ProbeOutcome::from_status(200),
                _ => ProbeOutcome::from_status(503),
            }
        }
    }

    fn api() -> Service {
        Service::new("qlorax-api", Criticality::Primary)
            .with_health_endpoint("http://localhost:8000/health")
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_fourth_attempt() {
        let probe = ScriptedProbe::new(Some(4));
        let prober = HealthProber::new(probe.clone());

        let result = prober.poll(&api(), &HealthCheckPolicy::primary()).await.unwrap();

        assert_eq!(result.outcome(), HealthOutcome::Ready);
        assert_eq!(result.attempts_used(), 4);
        assert_eq!(result.elapsed(), Duration::from_secs(6));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out_at_budget() {
        let probe = ScriptedProbe::new(None);
        let prober = HealthProber::new(probe.clone());
        let policy = HealthCheckPolicy::primary();

        let result = prober.poll(&api(), &policy).await.unwrap();

        assert_eq!(result.outcome(), HealthOutcome::TimedOut);
        assert_eq!(result.attempts_used(), 60);
        assert_eq!(result.elapsed(), Duration::from_secs(120));
        assert!(result.elapsed() <= policy.ceiling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_budget() {
        for max_attempts in [0u32, 1, 2, 7] {
            let prober = HealthProber::new(ScriptedProbe::new(None));
            let policy =
                HealthCheckPolicy::new(max_attempts, Duration::from_secs(2), Criticality::Secondary);
            let result = prober.poll(&api(), &policy).await.unwrap();
            assert_eq!(result.attempts_used(), max_attempts);
            assert!(result.elapsed() <= policy.ceiling());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediately_ready_does_not_sleep() {
        let prober = HealthProber::new(ScriptedProbe::new(Some(1)));
        let result = prober.poll(&api(), &HealthCheckPolicy::secondary()).await.unwrap();
        assert!(result.is_ready());
        assert_eq!(result.attempts_used(), 1);
        assert_eq!(result.elapsed(), Duration::ZERO);
    }

    /// Never answers within `delay`; then reports 503.
    struct SlowProbe {
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl HealthProbe for SlowProbe {
        async fn probe(&self, _url: &str) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            ProbeOutcome::from_status(503)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_endpoint_stays_within_ceiling() {
        let probe = Arc::new(SlowProbe {
            delay: Duration::from_secs(5),
            calls: AtomicU32::new(0),
        });
        let prober = HealthProber::new(probe.clone());
        let policy = HealthCheckPolicy::primary();

        let result = prober.poll(&api(), &policy).await.unwrap();

        assert_eq!(result.outcome(), HealthOutcome::TimedOut);
        assert_eq!(result.elapsed(), policy.ceiling());
        // 5s request + 2s sleep per tick; the 18th request is cut off at 120s.
        assert_eq!(result.attempts_used(), 18);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 18);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_endpoint_is_cut_off_at_ceiling() {
        let prober = HealthProber::new(Arc::new(SlowProbe {
            delay: Duration::from_secs(3600),
            calls: AtomicU32::new(0),
        }));
        let policy = HealthCheckPolicy::secondary();

        let result = prober.poll(&api(), &policy).await.unwrap();

        assert_eq!(result.outcome(), HealthOutcome::TimedOut);
        assert_eq!(result.attempts_used(), 1);
        assert_eq!(result.elapsed(), policy.ceiling());
    }

    #[tokio::test]
    async fn test_service_without_endpoint_is_rejected() {
        let prober = HealthProber::new(ScriptedProbe::new(Some(1)));
        let svc = Service::new("qlorax-trainer", Criticality::Secondary);
        let err = prober.poll(&svc, &HealthCheckPolicy::secondary()).await.unwrap_err();
        assert!(matches!(err, StackError::NoHealthEndpoint(_)));
    }

    #[test]
    fn test_status_classification() {
        assert!(ProbeOutcome::from_status(204).is_healthy());
        assert!(!ProbeOutcome::from_status(301).is_healthy());
        assert!(!ProbeOutcome::from_status(500).is_healthy());
    }
}
