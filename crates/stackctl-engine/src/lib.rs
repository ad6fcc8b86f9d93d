//! stackctl-engine: Container Engine Integration for stackctl
//!
//! This crate is the only place that knows how to talk to a container
//! engine. It wraps the `docker compose` CLI behind the [`ContainerEngine`]
//! trait so the control plane can be exercised against an in-memory fake.
//!
//! ## Layer 0 - Engine primitives
//!
//! Focus: build/up/down/ps/logs/exec as black boxes, with engine absence
//! distinguished from engine refusal.

pub mod compose;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod process;

pub use compose::{ComposeConfig, ComposeEngine};
pub use engine::{parse_ps_output, ContainerEngine, EngineInfo, EngineVariant, ServiceState};
pub use error::EngineError;
pub use process::{CommandOutput, CommandSpec};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
