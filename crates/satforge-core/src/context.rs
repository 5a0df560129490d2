//! Reasoning-context assembly.
//!
//! Each iteration the strategic reasoner sees the working state's metrics and
//! violations, the shared constraint thresholds, a bounded window of recent
//! failures, an optional one-shot rollback warning, and any retrieved
//! knowledge items.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use satforge_state::{EvaluationResult, MetricMap, StateId, ViolationRecord};

use crate::config::ConstraintThresholds;
use crate::ports::KnowledgeItem;
use crate::rollback::RollbackEvent;

/// Category of a recent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PlanFailed,
    Infeasible,
    NoOp,
    EvaluationFailed,
    RolledBack,
}

/// One remembered failure, replayed to the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNote {
    pub iteration: u32,
    pub kind: FailureKind,
    pub detail: String,
    /// Labels of the actions involved, e.g. `MOVE(battery)`
    pub actions: Vec<String>,
}

/// High-priority notice injected right after a rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackWarning {
    pub message: String,
    pub restored_state: StateId,
    pub discarded_state: StateId,
    /// Actions that led to the discarded state; do not repeat them verbatim
    pub rejected_actions: Vec<String>,
}

/// Everything the strategic reasoner receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningContext {
    pub iteration: u32,
    pub state_id: StateId,
    pub penalty: f64,
    pub best_penalty: f64,
    pub metrics: MetricMap,
    pub violations: Vec<ViolationRecord>,
    pub thresholds: ConstraintThresholds,
    pub recent_failures: Vec<FailureNote>,
    pub rollback_warning: Option<RollbackWarning>,
    pub knowledge: Vec<KnowledgeItem>,
}

impl ReasoningContext {
    /// Query string for knowledge retrieval, built from violation kinds.
    pub fn knowledge_query(working: &EvaluationResult) -> String {
        if working.violations.is_empty() {
            return "layout optimization".to_string();
        }
        let kinds: Vec<String> = working
            .violations
            .iter()
            .map(|v| v.kind.to_string())
            .collect();
        kinds.join(" ")
    }
}

/// Keeps failure memory across iterations and builds each context.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    window: usize,
    failures: VecDeque<FailureNote>,
    pending_warning: Option<RollbackWarning>,
}

impl ContextBuilder {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            failures: VecDeque::new(),
            pending_warning: None,
        }
    }

    pub fn note_failure(&mut self, note: FailureNote) {
        if self.window == 0 {
            return;
        }
        self.failures.push_back(note);
        while self.failures.len() > self.window {
            self.failures.pop_front();
        }
    }

    /// Arm a warning for the next context only.
    pub fn arm_warning(&mut self, event: &RollbackEvent, rejected_actions: Vec<String>) {
        self.pending_warning = Some(RollbackWarning {
            message: format!(
                "ROLLBACK at iteration {}: {}. Restored state {} (penalty {:.2}). \
                 Avoid repeating the rejected actions.",
                event.iteration, event.trigger, event.restored_state, event.penalty_after
            ),
            restored_state: event.restored_state.clone(),
            discarded_state: event.discarded_state.clone(),
            rejected_actions,
        });
    }

    pub fn has_pending_warning(&self) -> bool {
        self.pending_warning.is_some()
    }

    pub fn recent_failures(&self) -> Vec<FailureNote> {
        self.failures.iter().cloned().collect()
    }

    /// Build the context for `iteration`, consuming any armed warning.
    pub fn build(
        &mut self,
        iteration: u32,
        working: &EvaluationResult,
        best_penalty: f64,
        thresholds: &ConstraintThresholds,
        knowledge: Vec<KnowledgeItem>,
    ) -> ReasoningContext {
        ReasoningContext {
            iteration,
            state_id: working.state_id.clone(),
            penalty: working.penalty,
            best_penalty,
            metrics: working.metrics.clone(),
            violations: working.violations.clone(),
            thresholds: thresholds.clone(),
            recent_failures: self.recent_failures(),
            rollback_warning: self.pending_warning.take(),
            knowledge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollback::RollbackTrigger;
    use chrono::Utc;
    use satforge_state::ViolationKind;

    fn working() -> EvaluationResult {
        EvaluationResult {
            state_id: StateId::from("w"),
            iteration: 1,
            success: true,
            metrics: MetricMap::new(),
            violations: vec![ViolationRecord {
                kind: ViolationKind::ThermalOverheat,
                metric: "max_temp".to_string(),
                value: 70.0,
                threshold: 60.0,
                components: vec![],
            }],
            penalty: 200.0,
            error: None,
            evaluated_at: Utc::now(),
        }
    }

    fn note(iteration: u32) -> FailureNote {
        FailureNote {
            iteration,
            kind: FailureKind::NoOp,
            detail: "unchanged".to_string(),
            actions: vec![],
        }
    }

    #[test]
    fn test_failure_window_is_bounded() {
        let mut b = ContextBuilder::new(2);
        for i in 1..=4 {
            b.note_failure(note(i));
        }
        let recent: Vec<u32> = b.recent_failures().iter().map(|n| n.iteration).collect();
        assert_eq!(recent, vec![3, 4]);
    }

    #[test]
    fn test_warning_is_one_shot() {
        let mut b = ContextBuilder::new(5);
        let event = RollbackEvent {
            iteration: 3,
            trigger: RollbackTrigger::CeilingExceeded {
                penalty: 1200.0,
                ceiling: 1000.0,
            },
            discarded_state: StateId::from("bad"),
            restored_state: StateId::from("good"),
            penalty_before: 1200.0,
            penalty_after: 80.0,
            timestamp: Utc::now(),
        };
        b.arm_warning(&event, vec!["MOVE(a)".to_string()]);
        assert!(b.has_pending_warning());

        let thresholds = ConstraintThresholds::default();
        let first = b.build(4, &working(), 80.0, &thresholds, vec![]);
        let warning = first.rollback_warning.unwrap();
        assert!(warning.message.contains("ROLLBACK"));
        assert_eq!(warning.rejected_actions, vec!["MOVE(a)".to_string()]);

        let second = b.build(5, &working(), 80.0, &thresholds, vec![]);
        assert!(second.rollback_warning.is_none());
    }

    #[test]
    fn test_context_carries_shared_thresholds() {
        let mut b = ContextBuilder::new(5);
        let mut thresholds = ConstraintThresholds::default();
        thresholds.max_temp_c = 45.0;
        let ctx = b.build(1, &working(), 200.0, &thresholds, vec![]);
        assert_eq!(ctx.thresholds.max_temp_c, 45.0);
        assert_eq!(ctx.violations.len(), 1);
    }

    #[test]
    fn test_knowledge_query_from_violations() {
        assert_eq!(ReasoningContext::knowledge_query(&working()), "thermal_overheat");
    }
}
