//! Per-session atomic counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`LoopMetrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a session.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lightweight atomic counters, owned by one session.
#[derive(Debug, Default)]
pub struct LoopMetrics {
    evaluations: AtomicU64,
    plan_failures: AtomicU64,
    infeasible_rejections: AtomicU64,
    noop_rejections: AtomicU64,
    rollbacks: AtomicU64,
    dropped_actions: AtomicU64,
    conflicts: AtomicU64,
    audit_failures: AtomicU64,
}

/// Point-in-time copy of [`LoopMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub plan_failures: u64,
    pub infeasible_rejections: u64,
    pub noop_rejections: u64,
    pub rollbacks: u64,
    pub dropped_actions: u64,
    pub conflicts: u64,
    pub audit_failures: u64,
}

fn bump(counter: &AtomicU64, by: u64, name: &'static str) {
    counter.fetch_add(by, Ordering::Relaxed);
    tracing::trace!(metric = name, by, "counter incremented");
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_evaluations(&self) {
        bump(&self.evaluations, 1, "evaluations");
    }

    pub fn inc_plan_failures(&self) {
        bump(&self.plan_failures, 1, "plan_failures");
    }

    pub fn inc_infeasible(&self) {
        bump(&self.infeasible_rejections, 1, "infeasible_rejections");
    }

    pub fn inc_noop(&self) {
        bump(&self.noop_rejections, 1, "noop_rejections");
    }

    pub fn inc_rollbacks(&self) {
        bump(&self.rollbacks, 1, "rollbacks");
    }

    pub fn add_dropped_actions(&self, n: usize) {
        if n > 0 {
            bump(&self.dropped_actions, n as u64, "dropped_actions");
        }
    }

    pub fn add_conflicts(&self, n: usize) {
        if n > 0 {
            bump(&self.conflicts, n as u64, "conflicts");
        }
    }

    pub fn inc_audit_failures(&self) {
        bump(&self.audit_failures, 1, "audit_failures");
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            plan_failures: self.plan_failures.load(Ordering::Relaxed),
            infeasible_rejections: self.infeasible_rejections.load(Ordering::Relaxed),
            noop_rejections: self.noop_rejections.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            dropped_actions: self.dropped_actions.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            evaluations = s.evaluations,
            plan_failures = s.plan_failures,
            infeasible_rejections = s.infeasible_rejections,
            noop_rejections = s.noop_rejections,
            rollbacks = s.rollbacks,
            dropped_actions = s.dropped_actions,
            conflicts = s.conflicts,
            audit_failures = s.audit_failures,
        );
    }
}
