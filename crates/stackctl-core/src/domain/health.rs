//! Health polling policy and results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::service::Criticality;

/// Fixed-interval retry policy shared by every polled endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub criticality: Criticality,
}

impl HealthCheckPolicy {
    /// Attempts granted to the primary API (120s at 2s).
    pub const PRIMARY_ATTEMPTS: u32 = 60;
    /// Attempts granted to secondary services (60s at 2s).
    pub const SECONDARY_ATTEMPTS: u32 = 30;
    /// Sleep between attempts.
    pub const INTERVAL: Duration = Duration::from_secs(2);

    pub const fn new(max_attempts: u32, interval: Duration, criticality: Criticality) -> Self {
        Self {
            max_attempts,
            interval,
            criticality,
        }
    }

    pub const fn primary() -> Self {
        Self::new(Self::PRIMARY_ATTEMPTS, Self::INTERVAL, Criticality::Primary)
    }

    pub const fn secondary() -> Self {
        Self::new(Self::SECONDARY_ATTEMPTS, Self::INTERVAL, Criticality::Secondary)
    }

    /// Default policy for a criticality class.
    pub const fn for_criticality(criticality: Criticality) -> Self {
        match criticality {
            Criticality::Primary => Self::primary(),
            Criticality::Secondary => Self::secondary(),
        }
    }

    /// Upper bound on time spent sleeping: `max_attempts × interval`.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Terminal state of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthOutcome {
    Ready,
    TimedOut,
}

/// Outcome of polling one service. Constructed once by the prober.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    service: String,
    endpoint: String,
    criticality: Criticality,
    outcome: HealthOutcome,
    attempts_used: u32,
    elapsed: Duration,
}

impl HealthCheckResult {
    pub(crate) fn new(
        service: &str,
        endpoint: &str,
        criticality: Criticality,
        outcome: HealthOutcome,
        attempts_used: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            service: service.to_string(),
            endpoint: endpoint.to_string(),
            criticality,
            outcome,
            attempts_used,
            elapsed,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn criticality(&self) -> Criticality {
        self.criticality
    }

    pub fn outcome(&self) -> HealthOutcome {
        self.outcome
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn is_ready(&self) -> bool {
        self.outcome == HealthOutcome::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_ceilings_match_criticality() {
        assert_eq!(HealthCheckPolicy::primary().ceiling(), Duration::from_secs(120));
        assert_eq!(HealthCheckPolicy::secondary().ceiling(), Duration::from_secs(60));
        assert_eq!(
            HealthCheckPolicy::for_criticality(Criticality::Secondary).max_attempts,
            30
        );
    }
}
