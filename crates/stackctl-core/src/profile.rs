//! Profile composition.
//!
//! A profile token names a group of compose services started together. The
//! base services (API and UI) belong to every profile; `dev`, `monitoring` and
//! `full` add to them. Resolution is pure: the same token and configuration
//! always yield the same [`ServiceSet`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::StackConfig;
use crate::domain::{Criticality, PortBinding, Result, Service, StackError};

pub const DEFAULT_PROFILE: &str = "default";
pub const API_SERVICE: &str = "qlorax-api";
pub const UI_SERVICE: &str = "qlorax-ui";
pub const DEV_SERVICE: &str = "qlorax-dev";
pub const TRAINER_SERVICE: &str = "qlorax-trainer";
pub const PROMETHEUS_SERVICE: &str = "prometheus";
pub const GRAFANA_SERVICE: &str = "grafana";

/// Registered profile tokens, in documentation order.
pub const KNOWN_PROFILES: [&str; 4] = [DEFAULT_PROFILE, "dev", "full", "monitoring"];

const ALL: &[&str] = &KNOWN_PROFILES;

/// A named, non-empty, ordered group of services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    name: String,
    members: Vec<Service>,
}

impl Profile {
    /// Fails with `EmptyProfile` when `members` is empty.
    pub fn new(name: impl Into<String>, members: Vec<Service>) -> Result<Self> {
        let name = name.into();
        if members.is_empty() {
            return Err(StackError::EmptyProfile(name));
        }
        Ok(Self { name, members })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Service] {
        &self.members
    }
}

/// The concrete services a profile token resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSet {
    profile: String,
    services: Vec<Service>,
    registered: bool,
}

impl ServiceSet {
    /// The token this set was resolved from.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Services in start order. For a forwarded token this is the base set;
    /// whatever else the engine activates is not known locally.
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    /// Whether the token is in the local registry.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Token to pass as `--profile`, if any. The default profile needs none.
    pub fn engine_profile(&self) -> Option<&str> {
        if self.profile == DEFAULT_PROFILE {
            None
        } else {
            Some(&self.profile)
        }
    }

    /// The service whose health gates readiness messaging.
    pub fn primary(&self) -> Option<&Service> {
        self.services.iter().find(|s| s.is_primary())
    }

    /// Service name to published ports.
    pub fn port_map(&self) -> BTreeMap<String, Vec<PortBinding>> {
        self.services
            .iter()
            .filter(|s| !s.ports().is_empty())
            .map(|s| (s.name().to_string(), s.ports().to_vec()))
            .collect()
    }

    /// Host ports exposed by the whole set, ascending.
    pub fn host_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .services
            .iter()
            .flat_map(|s| s.ports().iter().map(|p| p.host))
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }
}

/// Resolves profile tokens against the registry.
#[derive(Debug, Clone)]
pub struct ProfileComposer {
    profiles: Vec<Profile>,
    strict: bool,
}

impl ProfileComposer {
    /// Registry for the QLORAX stack, with published ports taken from `config`.
    pub fn new(config: &StackConfig) -> Self {
        let api = Service::new(API_SERVICE, Criticality::Primary)
            .with_port(PortBinding::new(config.api_port, 8000))
            .with_health_endpoint(config.primary_health_url())
            .in_profiles(ALL);
        let ui = Service::new(UI_SERVICE, Criticality::Secondary)
            .with_port(PortBinding::new(config.ui_port, 7860))
            .with_health_endpoint(config.ui_url())
            .in_profiles(ALL);
        let dev = Service::new(DEV_SERVICE, Criticality::Secondary)
            .with_port(PortBinding::same(8888))
            .in_profiles(&["dev", "full"]);
        let trainer = Service::new(TRAINER_SERVICE, Criticality::Secondary).in_profiles(&["full"]);
        let prometheus = Service::new(PROMETHEUS_SERVICE, Criticality::Secondary)
            .with_port(PortBinding::same(9090))
            .in_profiles(&["monitoring", "full"]);
        let grafana = Service::new(GRAFANA_SERVICE, Criticality::Secondary)
            .with_port(PortBinding::same(3000))
            .in_profiles(&["monitoring", "full"]);

        let catalogue = [api, ui, dev, trainer, prometheus, grafana];
        let profiles = KNOWN_PROFILES
            .iter()
            .map(|name| Profile {
                name: name.to_string(),
                members: catalogue
                    .iter()
                    .filter(|s| s.belongs_to(name))
                    .cloned()
                    .collect(),
            })
            .collect();

        Self {
            profiles,
            strict: config.strict_profiles,
        }
    }

    /// Registered profiles in registry order.
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name() == name)
    }

    /// Resolve a token; `None` or a blank token means the default profile.
    ///
    /// Unregistered tokens are forwarded to the engine with the base service
    /// set, unless the composer is strict, in which case they are rejected.
    pub fn resolve(&self, token: Option<&str>) -> Result<ServiceSet> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_PROFILE);

        if let Some(profile) = self.get(token) {
            return Ok(ServiceSet {
                profile: profile.name().to_string(),
                services: profile.members().to_vec(),
                registered: true,
            });
        }

        if self.strict {
            return Err(StackError::UnknownProfile {
                token: token.to_string(),
                known: self.known_names().join(", "),
            });
        }

        let base = self
            .get(DEFAULT_PROFILE)
            .ok_or_else(|| StackError::EmptyProfile(DEFAULT_PROFILE.to_string()))?;
        Ok(ServiceSet {
            profile: token.to_string(),
            services: base.members().to_vec(),
            registered: false,
        })
    }

    fn known_names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name()).collect()
    }
}
