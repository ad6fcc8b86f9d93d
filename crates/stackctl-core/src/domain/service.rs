//! Service definitions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Readiness classification of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Gates readiness messaging; timeouts are logged at error level.
    Primary,
    /// Advisory only; timeouts are logged as warnings.
    Secondary,
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criticality::Primary => write!(f, "primary"),
            Criticality::Secondary => write!(f, "secondary"),
        }
    }
}

/// Host-to-container port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
}

impl PortBinding {
    pub const fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }

    /// Same port on both sides.
    pub const fn same(port: u16) -> Self {
        Self::new(port, port)
    }
}

impl std::fmt::Display for PortBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// A compose service known to the control plane.
///
/// Identity is the name; values are immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    name: String,
    profiles: BTreeSet<String>,
    ports: Vec<PortBinding>,
    health_endpoint: Option<String>,
    criticality: Criticality,
}

impl Service {
    /// Define a service with no ports, no health endpoint and no profile membership.
    pub fn new(name: impl Into<String>, criticality: Criticality) -> Self {
        Self {
            name: name.into(),
            profiles: BTreeSet::new(),
            ports: Vec::new(),
            health_endpoint: None,
            criticality,
        }
    }

    pub fn with_port(mut self, binding: PortBinding) -> Self {
        self.ports.push(binding);
        self
    }

    pub fn with_health_endpoint(mut self, url: impl Into<String>) -> Self {
        self.health_endpoint = Some(url.into());
        self
    }

    pub fn in_profiles(mut self, profiles: &[&str]) -> Self {
        self.profiles.extend(profiles.iter().map(|p| p.to_string()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profiles(&self) -> &BTreeSet<String> {
        &self.profiles
    }

    pub fn ports(&self) -> &[PortBinding] {
        &self.ports
    }

    pub fn health_endpoint(&self) -> Option<&str> {
        self.health_endpoint.as_deref()
    }

    pub fn criticality(&self) -> Criticality {
        self.criticality
    }

    pub fn is_primary(&self) -> bool {
        self.criticality == Criticality::Primary
    }

    pub fn belongs_to(&self, profile: &str) -> bool {
        self.profiles.contains(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_builder_sets_fields() {
        let svc = Service::new("qlorax-api", Criticality::Primary)
            .with_port(PortBinding::same(8000))
            .with_health_endpoint("http://localhost:8000/health")
            .in_profiles(&["default", "dev"]);

        assert_eq!(svc.name(), "qlorax-api");
        assert!(svc.is_primary());
        assert_eq!(svc.ports(), &[PortBinding::new(8000, 8000)]);
        assert_eq!(svc.health_endpoint(), Some("http://localhost:8000/health"));
        assert!(svc.belongs_to("dev"));
        assert!(!svc.belongs_to("monitoring"));
    }

    #[test]
    fn port_binding_display() {
        assert_eq!(PortBinding::new(8001, 8000).to_string(), "8001:8000");
    }
}
