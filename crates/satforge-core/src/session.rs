//! The optimization control loop.
//!
//! An [`OptimizationSession`] owns every piece of per-run mutable state
//! (pool handle, rollback controller, failure memory, counters) so several
//! sessions can run side by side without sharing anything.
//!
//! Per iteration:
//! 1. build the reasoning context and ask for a strategic plan
//! 2. coordinate proposals into one execution plan
//! 3. execute the plan into a candidate state
//! 4. gate the candidate (feasibility, then no-op)
//! 5. evaluate and pool the candidate
//! 6. stop on convergence, roll back on a trigger, otherwise accept
//!
//! Only configuration and store invariant failures end a run early. Oracle
//! trouble, invalid actions, and gate rejections cost at most one iteration.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use satforge_state::{
    AuditEntry, AuditKind, AuditSink, DesignState, EvaluationResult, MemoryAuditSink,
    MemoryStateStore, PoolEntry, StateId, StateStore,
};

use crate::config::OptimizerConfig;
use crate::context::{ContextBuilder, FailureKind, FailureNote, ReasoningContext};
use crate::coordinator::Coordinator;
use crate::domain::{Result, SatforgeError};
use crate::executor::ActionExecutor;
use crate::gate::{self, GateRejection, GateVerdict};
use crate::metrics::{LoopMetrics, MetricsSnapshot};
use crate::obs;
use crate::ports::{
    DomainProposer, KnowledgeBase, KnowledgeItem, LayoutEngine, OracleError, PhysicsOracle,
    StrategicReasoner,
};
use crate::rollback::{RollbackController, RollbackEvent};
use crate::scoring::Evaluator;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// External collaborators for one session.
pub struct Collaborators {
    pub layout: Arc<dyn LayoutEngine>,
    pub physics: Arc<dyn PhysicsOracle>,
    pub reasoner: Arc<dyn StrategicReasoner>,
    pub proposers: Vec<Arc<dyn DomainProposer>>,
    pub knowledge: Option<Arc<dyn KnowledgeBase>>,
    pub store: Arc<dyn StateStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Collaborators {
    /// Collaborators backed by an in-memory pool and audit trail.
    pub fn new(
        layout: Arc<dyn LayoutEngine>,
        physics: Arc<dyn PhysicsOracle>,
        reasoner: Arc<dyn StrategicReasoner>,
    ) -> Self {
        Self {
            layout,
            physics,
            reasoner,
            proposers: Vec::new(),
            knowledge: None,
            store: Arc::new(MemoryStateStore::new()),
            audit: Arc::new(MemoryAuditSink::new()),
        }
    }

    pub fn with_proposer(mut self, proposer: Arc<dyn DomainProposer>) -> Self {
        self.proposers.push(proposer);
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Converged,
    BudgetExhausted,
    Cancelled,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Converged => "converged",
            Termination::BudgetExhausted => "budget_exhausted",
            Termination::Cancelled => "cancelled",
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub session_id: String,
    pub termination: Termination,
    /// Iterations started, not counting the initial evaluation
    pub iterations: u32,
    pub working_state: StateId,
    pub working_penalty: f64,
    pub best_state: StateId,
    pub best_penalty: f64,
    pub rollbacks: Vec<RollbackEvent>,
    pub counters: MetricsSnapshot,
}

impl OptimizationOutcome {
    pub fn rollback_count(&self) -> usize {
        self.rollbacks.len()
    }
}

enum Step {
    Skipped,
    Accepted(DesignState, EvaluationResult),
    Converged(DesignState, EvaluationResult),
    RolledBack(PoolEntry),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct OptimizationSession {
    session_id: String,
    config: Arc<OptimizerConfig>,
    layout: Arc<dyn LayoutEngine>,
    reasoner: Arc<dyn StrategicReasoner>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    store: Arc<dyn StateStore>,
    audit: Arc<dyn AuditSink>,
    coordinator: Coordinator,
    evaluator: Evaluator,
    executor: ActionExecutor,
    rollback: RollbackController,
    context: ContextBuilder,
    metrics: LoopMetrics,
    audit_seq: u64,
}

impl OptimizationSession {
    /// Validate `config` and wire the collaborators together.
    pub fn new(config: OptimizerConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let Collaborators {
            layout,
            physics,
            reasoner,
            proposers,
            knowledge,
            store,
            audit,
        } = collaborators;

        Ok(Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            coordinator: Coordinator::with_proposers(Arc::clone(&config), proposers),
            evaluator: Evaluator::new(Arc::clone(&layout), Arc::clone(&physics), Arc::clone(&config)),
            executor: ActionExecutor::new(Arc::clone(&layout), physics, Arc::clone(&config)),
            rollback: RollbackController::new(config.rollback.clone()),
            context: ContextBuilder::new(config.context.recent_failure_window),
            metrics: LoopMetrics::new(),
            audit_seq: 0,
            layout,
            reasoner,
            knowledge,
            store,
            audit,
            config,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Run the loop from `initial` until convergence, budget exhaustion, or
    /// cancellation. Cancellation is observed between iterations.
    pub async fn run(
        mut self,
        initial: DesignState,
        cancel: CancellationToken,
    ) -> Result<OptimizationOutcome> {
        let span = obs::session_span(&self.session_id);
        self.run_inner(initial, cancel).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        initial: DesignState,
        cancel: CancellationToken,
    ) -> Result<OptimizationOutcome> {
        let started = Instant::now();
        if let Some(parent) = &initial.parent_id {
            return Err(SatforgeError::Invariant(format!(
                "initial state {} must be a root, found parent {parent}",
                initial.state_id
            )));
        }

        obs::emit_session_started(
            &self.session_id,
            initial.state_id.as_str(),
            self.config.max_iterations,
        );
        self.record(
            0,
            AuditKind::SessionStarted,
            &serde_json::json!({
                "initial_state": initial.state_id,
                "config": self.config.as_ref(),
            }),
        )
        .await;

        let initial_result = self.evaluate_and_store(&initial, 0).await?;
        self.rollback.record_baseline(initial_result.penalty);

        let mut working = initial;
        let mut working_result = initial_result;
        let mut termination = Termination::BudgetExhausted;
        let mut iterations = 0;

        if working_result.is_converged() {
            obs::emit_converged(0, working.state_id.as_str(), working_result.penalty);
            termination = Termination::Converged;
        } else {
            for iteration in 1..=self.config.max_iterations {
                if cancel.is_cancelled() {
                    info!(iteration, "cancellation requested");
                    termination = Termination::Cancelled;
                    break;
                }
                iterations = iteration;

                match self.step(iteration, &working, &working_result).await? {
                    Step::Skipped => {}
                    Step::Accepted(state, result) => {
                        working = state;
                        working_result = result;
                    }
                    Step::RolledBack(entry) => {
                        working = entry.state;
                        working_result = entry.result;
                    }
                    Step::Converged(state, result) => {
                        working = state;
                        working_result = result;
                        termination = Termination::Converged;
                        break;
                    }
                }
            }
        }

        self.metrics.flush();
        let best = self.store.best().await?.ok_or_else(|| {
            SatforgeError::Invariant("state pool is empty after a run".to_string())
        })?;

        let outcome = OptimizationOutcome {
            session_id: self.session_id.clone(),
            termination,
            iterations,
            working_state: working.state_id.clone(),
            working_penalty: working_result.penalty,
            best_state: best.state.state_id.clone(),
            best_penalty: best.result.penalty,
            rollbacks: self.rollback.events().to_vec(),
            counters: self.metrics.snapshot(),
        };

        obs::emit_session_finished(
            &self.session_id,
            termination.as_str(),
            iterations,
            outcome.best_penalty,
            started.elapsed().as_millis() as u64,
        );
        self.record(iterations, AuditKind::SessionFinished, &outcome)
            .await;
        Ok(outcome)
    }

    async fn step(
        &mut self,
        iteration: u32,
        working: &DesignState,
        working_result: &EvaluationResult,
    ) -> Result<Step> {
        obs::emit_iteration_started(iteration, working.state_id.as_str(), working_result.penalty);

        let knowledge = self.retrieve_knowledge(working_result).await;
        let best_penalty = self
            .store
            .best()
            .await?
            .map_or(working_result.penalty, |e| e.penalty());
        let ctx = self.context.build(
            iteration,
            working_result,
            best_penalty,
            &self.config.thresholds,
            knowledge,
        );
        self.record(iteration, AuditKind::IterationContext, &ctx).await;

        let limit = self.config.timeouts.planning();
        let planned = match tokio::time::timeout(limit, self.reasoner.plan(&ctx)).await {
            Ok(res) => res,
            Err(_) => Err(OracleError::timeout("strategic planning", limit)),
        };
        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => {
                self.metrics.inc_plan_failures();
                obs::emit_plan_failed(iteration, &e);
                self.context.note_failure(FailureNote {
                    iteration,
                    kind: FailureKind::PlanFailed,
                    detail: e.to_string(),
                    actions: Vec::new(),
                });
                self.record(
                    iteration,
                    AuditKind::PlanFailed,
                    &serde_json::json!({ "error": e.to_string() }),
                )
                .await;
                return Ok(Step::Skipped);
            }
        };
        self.record(iteration, AuditKind::StrategicPlan, &plan).await;

        let mut exec = self
            .coordinator
            .coordinate(&plan, working, &working_result.metrics, iteration)
            .await;
        let report = self.executor.execute(working, &mut exec).await?;
        self.metrics.add_dropped_actions(exec.dropped.len());
        self.metrics.add_conflicts(exec.conflicts.len());
        self.record(
            iteration,
            AuditKind::ExecutionPlan,
            &serde_json::json!({ "plan": &exec, "outcomes": &report.outcomes }),
        )
        .await;

        let labels = exec.action_labels();
        let wrote_parameters = report.wrote_parameters;
        let candidate = report.candidate;

        let verdict = gate::screen(
            self.layout.as_ref(),
            working,
            &candidate,
            &self.config.thresholds,
        )?;
        if let GateVerdict::Reject(rejection) = verdict {
            let kind = match rejection {
                GateRejection::Infeasible { .. } => {
                    self.metrics.inc_infeasible();
                    FailureKind::Infeasible
                }
                GateRejection::NoOp { .. } => {
                    self.metrics.inc_noop();
                    FailureKind::NoOp
                }
            };
            obs::emit_gate_rejected(iteration, candidate.state_id.as_str(), &rejection);
            if wrote_parameters {
                self.executor.sync_parameters(working).await;
            }
            self.context.note_failure(FailureNote {
                iteration,
                kind,
                detail: rejection.to_string(),
                actions: labels,
            });
            self.record(
                iteration,
                AuditKind::GateRejected,
                &serde_json::json!({ "candidate": candidate.state_id, "rejection": rejection }),
            )
            .await;
            return Ok(Step::Skipped);
        }

        let result = self.evaluate_and_store(&candidate, iteration).await?;

        if result.is_converged() {
            obs::emit_converged(iteration, candidate.state_id.as_str(), result.penalty);
            return Ok(Step::Converged(candidate, result));
        }

        if !result.success {
            self.context.note_failure(FailureNote {
                iteration,
                kind: FailureKind::EvaluationFailed,
                detail: result.error.clone().unwrap_or_default(),
                actions: labels.clone(),
            });
        }

        if let Some(trigger) = self.rollback.observe(&result) {
            let (event, restored) = self
                .rollback
                .rollback(self.store.as_ref(), trigger, &result, iteration)
                .await?;
            self.metrics.inc_rollbacks();
            obs::emit_rollback(&event);
            self.executor.sync_parameters(&restored.state).await;
            self.context.note_failure(FailureNote {
                iteration,
                kind: FailureKind::RolledBack,
                detail: event.trigger.to_string(),
                actions: labels.clone(),
            });
            self.context.arm_warning(&event, labels);
            self.record(iteration, AuditKind::Rollback, &event).await;
            return Ok(Step::RolledBack(restored));
        }

        Ok(Step::Accepted(candidate, result))
    }

    async fn evaluate_and_store(
        &mut self,
        state: &DesignState,
        iteration: u32,
    ) -> Result<EvaluationResult> {
        let result = self.evaluator.evaluate(state, iteration).await;
        self.metrics.inc_evaluations();
        obs::emit_evaluated(
            iteration,
            state.state_id.as_str(),
            result.penalty,
            result.violations.len(),
            result.success,
        );
        self.store.put(state.clone(), result.clone()).await?;
        self.record(iteration, AuditKind::Evaluation, &result).await;
        Ok(result)
    }

    async fn retrieve_knowledge(&self, working: &EvaluationResult) -> Vec<KnowledgeItem> {
        let top_k = self.config.context.knowledge_top_k;
        let Some(kb) = self.knowledge.as_ref().filter(|_| top_k > 0) else {
            return Vec::new();
        };
        let query = ReasoningContext::knowledge_query(working);
        let limit = self.config.timeouts.knowledge();
        match tokio::time::timeout(limit, kb.retrieve(&query, top_k)).await {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                warn!(error = %e, query = %query, "knowledge retrieval failed");
                Vec::new()
            }
            Err(_) => {
                warn!(after_ms = limit.as_millis() as u64, "knowledge retrieval timed out");
                Vec::new()
            }
        }
    }

    /// Write one audit entry. Sink failures are counted and logged, never raised.
    async fn record<T: Serialize + Sync>(&mut self, iteration: u32, kind: AuditKind, payload: &T) {
        let payload = serde_json::to_value(payload).unwrap_or_else(
            |e| serde_json::json!({ "serialization_error": e.to_string() }),
        );
        self.audit_seq += 1;
        let entry = AuditEntry {
            seq: self.audit_seq,
            session_id: self.session_id.clone(),
            iteration,
            kind,
            payload,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.audit.record(entry).await {
            self.metrics.inc_audit_failures();
            obs::emit_audit_failure(&self.session_id, &format!("{kind:?}"), &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{AabbLayout, ScriptedPhysics, ScriptedReasoner};

    fn collaborators() -> Collaborators {
        Collaborators::new(
            Arc::new(AabbLayout::new()),
            Arc::new(ScriptedPhysics::new([50.0])),
            Arc::new(ScriptedReasoner::default()),
        )
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = OptimizerConfig {
            max_iterations: 0,
            ..OptimizerConfig::default()
        };
        let err = OptimizationSession::new(config, collaborators()).err().unwrap();
        assert!(matches!(err, SatforgeError::Config(_)));
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let a = OptimizationSession::new(OptimizerConfig::default(), collaborators()).unwrap();
        let b = OptimizationSession::new(OptimizerConfig::default(), collaborators()).unwrap();
        assert_ne!(a.session_id(), b.session_id());
    }

    #[tokio::test]
    async fn test_non_root_initial_state_is_rejected() {
        use satforge_state::{Component, Envelope, Vec3};
        let root = DesignState::root(
            vec![Component::new("a", Vec3::ZERO, Vec3::new(10.0, 10.0, 10.0))],
            Envelope::new(Vec3::new(400.0, 400.0, 400.0), 2.0),
        );
        let session = OptimizationSession::new(OptimizerConfig::default(), collaborators()).unwrap();
        let err = session
            .run(root.child(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SatforgeError::Invariant(_)));
    }
}
