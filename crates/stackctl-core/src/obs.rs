//! Structured observability hooks for stack operations.
//!
//! This module provides:
//! - Operation-scoped tracing spans via `OperationSpan` RAII guard
//! - Emission functions for lifecycle milestones: phase changes, service
//!   start, health results, snapshots and restores
//!
//! Events carry an `event` field (`stack.*`) so JSON log consumers can filter
//! on it. Filtering follows `RUST_LOG`.

use tracing::{error, info, warn};

use crate::domain::{Criticality, HealthCheckResult};

/// RAII guard that enters an operation-scoped span for its lifetime.
///
/// # Example
///
/// ```ignore
/// let _span = OperationSpan::enter("start", "qlorax");
/// // every event below carries operation=start project=qlorax
/// ```
pub struct OperationSpan {
    _span: tracing::span::EnteredSpan,
}

impl OperationSpan {
    pub fn enter(operation: &str, project: &str) -> Self {
        Self {
            _span: operation_span(operation, project).entered(),
        }
    }
}

/// Span for an operation that awaits; attach with `Instrument::instrument`.
pub fn operation_span(operation: &str, project: &str) -> tracing::Span {
    tracing::info_span!("stack.op", operation = %operation, project = %project)
}

/// Emit event: lifecycle phase changed.
pub fn emit_phase_changed(from: &str, to: &str) {
    info!(event = "stack.phase", from = %from, to = %to);
}

/// Emit event: image build started / finished.
pub fn emit_build(stage: &str, duration_ms: Option<u64>) {
    match duration_ms {
        Some(ms) => info!(event = "stack.build.finished", stage = %stage, duration_ms = ms),
        None => info!(event = "stack.build.started", stage = %stage),
    }
}

/// Emit event: a service (or a forwarded profile) was brought up.
pub fn emit_service_started(service: &str) {
    info!(event = "stack.service.started", service = %service);
}

/// Emit the outcome of a health poll.
///
/// Ready is info. A timeout is error level for primary services and warning
/// level for secondary ones; neither aborts the caller.
pub fn emit_health_result(result: &HealthCheckResult) {
    let elapsed_ms = result.elapsed().as_millis() as u64;
    if result.is_ready() {
        info!(
            event = "stack.health.ready",
            service = %result.service(),
            attempts = result.attempts_used(),
            elapsed_ms = elapsed_ms,
        );
        return;
    }

    match result.criticality() {
        Criticality::Primary => error!(
            event = "stack.health.timeout",
            service = %result.service(),
            endpoint = %result.endpoint(),
            attempts = result.attempts_used(),
            elapsed_ms = elapsed_ms,
            "primary service did not become healthy; continuing, check `stackctl logs`"
        ),
        Criticality::Secondary => warn!(
            event = "stack.health.timeout",
            service = %result.service(),
            endpoint = %result.endpoint(),
            attempts = result.attempts_used(),
            elapsed_ms = elapsed_ms,
            "service not responding yet"
        ),
    }
}

/// Emit event: snapshot written.
pub fn emit_snapshot_created(id: &str, directories: &[String], files: usize) {
    info!(event = "stack.backup.created", snapshot = %id, directories = ?directories, files = files);
}

/// Emit event: a directory was skipped because it does not exist.
pub fn emit_snapshot_skipped(id: &str, directory: &str) {
    warn!(event = "stack.backup.skipped", snapshot = %id, directory = %directory);
}

/// Emit event: restore replaced the live directories.
pub fn emit_restore_completed(id: &str, restored: &[String]) {
    info!(event = "stack.restore.completed", snapshot = %id, restored = ?restored);
}
