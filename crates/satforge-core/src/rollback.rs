//! Rollback controller.
//!
//! A two-state machine (`Normal`, `RolledBack`) watching the penalty history.
//! It fires when the latest evaluation failed, when the penalty exceeds the
//! hard ceiling, or when penalties have not decreased across the plateau
//! window. On firing, the working state jumps to the global best entry in the
//! pool, which need not be the immediate parent.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use satforge_state::{EvaluationResult, PoolEntry, StateId, StateStore};

use crate::config::RollbackPolicy;
use crate::domain::{Result, SatforgeError};

/// Controller state. `RolledBack` is transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Normal,
    RolledBack,
}

/// Why a rollback fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollbackTrigger {
    EvaluationFailed { error: Option<String> },
    CeilingExceeded { penalty: f64, ceiling: f64 },
    Plateau { window: Vec<f64> },
}

impl std::fmt::Display for RollbackTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackTrigger::EvaluationFailed { error } => write!(
                f,
                "evaluation failed ({})",
                error.as_deref().unwrap_or("no detail")
            ),
            RollbackTrigger::CeilingExceeded { penalty, ceiling } => {
                write!(f, "penalty {penalty:.2} above ceiling {ceiling:.2}")
            }
            RollbackTrigger::Plateau { window } => {
                write!(f, "penalty not improving over {window:?}")
            }
        }
    }
}

/// Immutable audit record of one rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub iteration: u32,
    pub trigger: RollbackTrigger,
    pub discarded_state: StateId,
    pub restored_state: StateId,
    pub penalty_before: f64,
    pub penalty_after: f64,
    pub timestamp: DateTime<Utc>,
}

/// Watches penalty history and performs rollbacks against a state store.
#[derive(Debug, Clone)]
pub struct RollbackController {
    policy: RollbackPolicy,
    history: VecDeque<f64>,
    state: ControllerState,
    events: Vec<RollbackEvent>,
}

impl RollbackController {
    pub fn new(policy: RollbackPolicy) -> Self {
        Self {
            policy,
            history: VecDeque::new(),
            state: ControllerState::Normal,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn rollback_count(&self) -> u32 {
        self.events.len() as u32
    }

    pub fn events(&self) -> &[RollbackEvent] {
        &self.events
    }

    /// Penalties currently considered for plateau detection, oldest first.
    pub fn history(&self) -> Vec<f64> {
        self.history.iter().copied().collect()
    }

    fn push_penalty(&mut self, penalty: f64) {
        self.history.push_back(penalty);
        while self.history.len() > self.policy.plateau_window {
            self.history.pop_front();
        }
    }

    /// Seed the history with the working state's penalty without checking triggers.
    pub fn record_baseline(&mut self, penalty: f64) {
        self.push_penalty(penalty);
    }

    /// Record a new evaluation and report whether a rollback should fire.
    pub fn observe(&mut self, result: &EvaluationResult) -> Option<RollbackTrigger> {
        self.push_penalty(result.penalty);
        if !self.policy.enabled {
            return None;
        }

        if !result.success {
            return Some(RollbackTrigger::EvaluationFailed {
                error: result.error.clone(),
            });
        }
        if result.penalty > self.policy.penalty_ceiling {
            return Some(RollbackTrigger::CeilingExceeded {
                penalty: result.penalty,
                ceiling: self.policy.penalty_ceiling,
            });
        }
        if self.history.len() >= self.policy.plateau_window {
            let window: Vec<f64> = self.history.iter().copied().collect();
            if window.windows(2).all(|w| w[1] >= w[0]) {
                return Some(RollbackTrigger::Plateau { window });
            }
        }
        None
    }

    /// Jump to the global minimum-penalty entry.
    ///
    /// The discarded candidate must already be pooled. History is reset to
    /// the restored penalty and the controller returns to `Normal`.
    pub async fn rollback(
        &mut self,
        store: &dyn StateStore,
        trigger: RollbackTrigger,
        discarded: &EvaluationResult,
        iteration: u32,
    ) -> Result<(RollbackEvent, PoolEntry)> {
        self.state = ControllerState::RolledBack;

        let best = store.best().await?.ok_or_else(|| {
            SatforgeError::Invariant("rollback requested on an empty state pool".to_string())
        })?;

        let event = RollbackEvent {
            iteration,
            trigger,
            discarded_state: discarded.state_id.clone(),
            restored_state: best.state.state_id.clone(),
            penalty_before: discarded.penalty,
            penalty_after: best.result.penalty,
            timestamp: Utc::now(),
        };
        self.events.push(event.clone());

        self.history.clear();
        self.push_penalty(best.result.penalty);
        self.state = ControllerState::Normal;

        Ok((event, best))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satforge_state::{Component, DesignState, Envelope, MemoryStateStore, MetricMap, Vec3};

    fn result(penalty: f64) -> EvaluationResult {
        EvaluationResult {
            state_id: StateId::new(),
            iteration: 0,
            success: true,
            metrics: MetricMap::new(),
            violations: vec![],
            penalty,
            error: None,
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_plateau_fires_on_third_non_decreasing_penalty() {
        let mut c = RollbackController::new(RollbackPolicy::default());
        assert!(c.observe(&result(100.0)).is_none());
        assert!(c.observe(&result(150.0)).is_none());
        let trigger = c.observe(&result(200.0)).unwrap();
        assert_eq!(
            trigger,
            RollbackTrigger::Plateau {
                window: vec![100.0, 150.0, 200.0]
            }
        );
    }

    #[test]
    fn test_improvement_breaks_plateau() {
        let mut c = RollbackController::new(RollbackPolicy::default());
        c.observe(&result(100.0));
        c.observe(&result(150.0));
        assert!(c.observe(&result(120.0)).is_none());
        assert!(c.observe(&result(110.0)).is_none());
    }

    #[test]
    fn test_ceiling_fires_immediately() {
        let mut c = RollbackController::new(RollbackPolicy::default());
        let trigger = c.observe(&result(1500.0)).unwrap();
        assert!(matches!(trigger, RollbackTrigger::CeilingExceeded { penalty, .. } if penalty == 1500.0));
    }

    #[test]
    fn test_failure_fires_before_ceiling() {
        let mut c = RollbackController::new(RollbackPolicy::default());
        let mut failed = result(9999.0);
        failed.success = false;
        failed.error = Some("solver diverged".to_string());
        assert!(matches!(
            c.observe(&failed),
            Some(RollbackTrigger::EvaluationFailed { .. })
        ));
    }

    #[test]
    fn test_disabled_policy_never_fires() {
        let mut c = RollbackController::new(RollbackPolicy {
            enabled: false,
            ..RollbackPolicy::default()
        });
        for p in [100.0, 200.0, 5000.0] {
            assert!(c.observe(&result(p)).is_none());
        }
    }

    #[test]
    fn test_baseline_counts_toward_plateau() {
        let mut c = RollbackController::new(RollbackPolicy::default());
        c.record_baseline(100.0);
        assert!(c.observe(&result(150.0)).is_none());
        assert!(c.observe(&result(200.0)).is_some());
    }

    #[tokio::test]
    async fn test_rollback_restores_global_best() {
        let store = MemoryStateStore::new();
        let root = DesignState::root(
            vec![Component::new("a", Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0))],
            Envelope::new(Vec3::new(100.0, 100.0, 100.0), 1.0),
        );
        let s1 = root.child();
        let s2 = s1.child();
        let scored = |s: &DesignState, p: f64| EvaluationResult {
            state_id: s.state_id.clone(),
            ..result(p)
        };
        store.put(root.clone(), scored(&root, 300.0)).await.unwrap();
        store.put(s1.clone(), scored(&s1, 80.0)).await.unwrap();
        let discarded = scored(&s2, 1200.0);
        store.put(s2.clone(), discarded.clone()).await.unwrap();

        let mut c = RollbackController::new(RollbackPolicy::default());
        c.record_baseline(80.0);
        let trigger = c.observe(&discarded).unwrap();
        let (event, restored) = c.rollback(&store, trigger, &discarded, 2).await.unwrap();

        assert_eq!(restored.state.state_id, s1.state_id);
        assert_eq!(event.restored_state, s1.state_id);
        assert_eq!(event.discarded_state, s2.state_id);
        assert_eq!(event.penalty_before, 1200.0);
        assert_eq!(event.penalty_after, 80.0);
        assert_eq!(c.rollback_count(), 1);
        assert_eq!(c.state(), ControllerState::Normal);
        assert_eq!(c.history(), vec![80.0]);
    }

    #[tokio::test]
    async fn test_rollback_on_empty_pool_is_invariant_error() {
        let store = MemoryStateStore::new();
        let mut c = RollbackController::new(RollbackPolicy::default());
        let discarded = result(2000.0);
        let err = c
            .rollback(&store, RollbackTrigger::Plateau { window: vec![] }, &discarded, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SatforgeError::Invariant(_)));
    }
}
