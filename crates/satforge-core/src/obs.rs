//! Structured observability hooks for optimization sessions.
//!
//! This module provides:
//! - a session-scoped tracing span carrying `session_id`
//! - one emission function per loop event, each tagged with a stable
//!   `event = "..."` field so log pipelines can filter on it
//!
//! Set `RUST_LOG` to control verbosity; see [`crate::telemetry`] for JSON output.

use tracing::{debug, info, warn};

use crate::domain::{ActionRejection, ConflictRecord, Domain};
use crate::gate::GateRejection;
use crate::rollback::RollbackEvent;

/// Span that tags every event of one session with its id.
///
/// Attach it with `tracing::Instrument` so it follows the session future
/// across await points.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("satforge.session", session_id = %session_id)
}

pub fn emit_session_started(session_id: &str, initial_state: &str, max_iterations: u32) {
    info!(
        event = "session.started",
        session_id = %session_id,
        initial_state = %initial_state,
        max_iterations = max_iterations,
    );
}

pub fn emit_iteration_started(iteration: u32, working_state: &str, penalty: f64) {
    debug!(
        event = "iteration.started",
        iteration = iteration,
        working_state = %working_state,
        penalty = penalty,
    );
}

/// Emit event: the strategic reasoner produced nothing usable.
pub fn emit_plan_failed(iteration: u32, error: &dyn std::fmt::Display) {
    warn!(event = "plan.failed", iteration = iteration, error = %error);
}

/// Emit event: a proposed action was discarded before merging.
pub fn emit_action_dropped(iteration: u32, domain: Domain, op: &str, rejection: &ActionRejection) {
    warn!(
        event = "action.dropped",
        iteration = iteration,
        domain = %domain,
        op = %op,
        reason = %rejection,
    );
}

pub fn emit_conflict_resolved(iteration: u32, conflict: &ConflictRecord) {
    info!(
        event = "conflict.resolved",
        iteration = iteration,
        kept = %conflict.kept,
        kept_domain = %conflict.kept_domain,
        dropped = %conflict.dropped,
        dropped_domain = %conflict.dropped_domain,
        reason = %conflict.reason,
    );
}

/// Emit event: bound parameters were pushed back from a kept state.
pub fn emit_parameters_synced(state_id: &str, synced: usize, failed: usize) {
    info!(
        event = "parameters.synced",
        state_id = %state_id,
        synced = synced,
        failed = failed,
    );
}

/// Emit event: no name in a parameter cascade was accepted.
pub fn emit_cascade_exhausted(component: &str, attempts: &[(String, Option<String>)]) {
    let tried: Vec<&str> = attempts.iter().map(|(n, _)| n.as_str()).collect();
    warn!(
        event = "cascade.exhausted",
        component = %component,
        tried = ?tried,
    );
}

pub fn emit_gate_rejected(iteration: u32, candidate: &str, rejection: &GateRejection) {
    warn!(
        event = "gate.rejected",
        iteration = iteration,
        candidate = %candidate,
        reason = rejection.label(),
        detail = %rejection,
    );
}

pub fn emit_evaluated(iteration: u32, state_id: &str, penalty: f64, violations: usize, success: bool) {
    info!(
        event = "state.evaluated",
        iteration = iteration,
        state_id = %state_id,
        penalty = penalty,
        violations = violations,
        success = success,
    );
}

pub fn emit_rollback(event: &RollbackEvent) {
    warn!(
        event = "rollback",
        iteration = event.iteration,
        trigger = %event.trigger,
        discarded_state = %event.discarded_state,
        restored_state = %event.restored_state,
        penalty_before = event.penalty_before,
        penalty_after = event.penalty_after,
    );
}

pub fn emit_converged(iteration: u32, state_id: &str, penalty: f64) {
    info!(event = "session.converged", iteration = iteration, state_id = %state_id, penalty = penalty);
}

/// Emit event: session finished with its termination reason.
pub fn emit_session_finished(
    session_id: &str,
    termination: &str,
    iterations: u32,
    best_penalty: f64,
    duration_ms: u64,
) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        termination = %termination,
        iterations = iterations,
        best_penalty = best_penalty,
        duration_ms = duration_ms,
    );
}

/// Emit event: an audit record could not be written (warning level).
pub fn emit_audit_failure(session_id: &str, kind: &str, error: &dyn std::fmt::Display) {
    warn!(event = "audit.write_failed", session_id = %session_id, kind = %kind, error = %error);
}
