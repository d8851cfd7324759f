//! Structured observability hooks for pipeline runs.
//!
//! This module provides:
//! - A run-scoped tracing span (`run_span`)
//! - Emission functions for lifecycle events: run start/finish, stage
//!   start/finish, capability invocation, cancellation, journal failures
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use tracing::{info, warn};

/// Run-scoped span. Attach it to the run future with
/// [`tracing::Instrument::instrument`] so every event below carries `run_id`.
///
/// # Example
///
/// ```ignore
/// pipeline.execute(options).instrument(run_span(&run_id)).await;
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("purposepay.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, stage_count: usize) {
    info!(event = "run.started", run_id = %run_id, stages = stage_count);
}

pub fn emit_stage_started(stage: &str, role: &str, position: usize) {
    info!(event = "stage.started", stage = %stage, role = %role, position = position);
}

/// Emit event: one capability call resolved (successfully or not).
pub fn emit_capability_invoked(stage: &str, capability: &str, duration_ms: u64, ok: bool) {
    info!(
        event = "capability.invoked",
        stage = %stage,
        capability = %capability,
        duration_ms = duration_ms,
        ok = ok,
    );
}

pub fn emit_stage_finished(stage: &str, status: &str) {
    info!(event = "stage.finished", stage = %stage, status = %status);
}

pub fn emit_run_finished(run_id: &str, status: &str, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_run_cancelled(run_id: &str, before_stage: &str) {
    warn!(event = "run.cancelled", run_id = %run_id, before_stage = %before_stage);
}

/// Emit event: a completed run could not be journaled (warning level).
pub fn emit_journal_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "journal.append_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _guard = span.enter();
        emit_stage_started("verify", "verifier", 0);
    }
}
