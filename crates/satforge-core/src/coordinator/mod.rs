//! Multi-agent plan coordination.
//!
//! Turns one [`StrategicPlan`] into one [`ExecutionPlan`]:
//! - `dispatch`: concurrent, time-bounded proposer calls
//! - `validate`: per-action decoding and bounds checks
//! - `merge`: de-duplication, cross-domain arbitration, priority resolution,
//!   execution ordering

pub mod dispatch;
pub mod merge;
pub mod validate;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use satforge_state::{DesignState, MetricMap};

use crate::config::OptimizerConfig;
use crate::domain::{
    Action, AgentProposal, Domain, DropStage, DroppedAction, ExecutionPlan, ProposalTrace,
    StrategicPlan,
};
use crate::obs;
use crate::ports::DomainProposer;

pub use dispatch::{dispatch_parallel, DispatchOutcome};
pub use merge::{actions_conflict, merge_proposals, MergeOutcome};
pub use validate::validate_action;

/// Routes sub-tasks to registered domain proposers and merges their answers.
pub struct Coordinator {
    proposers: HashMap<Domain, Arc<dyn DomainProposer>>,
    config: Arc<OptimizerConfig>,
}

impl Coordinator {
    pub fn new(config: Arc<OptimizerConfig>) -> Self {
        Self {
            proposers: HashMap::new(),
            config,
        }
    }

    /// Register a proposer for its domain, replacing any previous one.
    pub fn register(&mut self, proposer: Arc<dyn DomainProposer>) {
        self.proposers.insert(proposer.domain(), proposer);
    }

    pub fn with_proposers(
        config: Arc<OptimizerConfig>,
        proposers: impl IntoIterator<Item = Arc<dyn DomainProposer>>,
    ) -> Self {
        let mut coordinator = Self::new(config);
        for p in proposers {
            coordinator.register(p);
        }
        coordinator
    }

    /// Registered domains, sorted.
    pub fn domains(&self) -> Vec<Domain> {
        let mut domains: Vec<Domain> = self.proposers.keys().copied().collect();
        domains.sort();
        domains
    }

    /// Dispatch, validate, and merge one strategic plan.
    ///
    /// Never fails: broken proposals and invalid actions are recorded in the
    /// returned plan and otherwise ignored.
    #[instrument(skip_all, fields(iteration = iteration, tasks = plan.tasks.len()))]
    pub async fn coordinate(
        &self,
        plan: &StrategicPlan,
        state: &DesignState,
        metrics: &MetricMap,
        iteration: u32,
    ) -> ExecutionPlan {
        let settings = &self.config.coordinator;
        let outcomes = dispatch_parallel(
            &self.proposers,
            &plan.tasks,
            Arc::new(state.clone()),
            Arc::new(metrics.clone()),
            settings.max_concurrent,
            self.config.timeouts.proposal(),
        )
        .await;

        let mut exec = ExecutionPlan::empty(iteration);
        let mut proposals: Vec<AgentProposal> = Vec::new();

        for outcome in outcomes {
            let task = &outcome.task;
            let raw = match outcome.result {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(task_id = %task.task_id, domain = %task.domain, error = %e, "proposal discarded");
                    exec.traces.push(ProposalTrace {
                        task_id: task.task_id.clone(),
                        domain: task.domain,
                        reasoning: format!("proposal failed: {e}"),
                        confidence: 0.0,
                        action_count: 0,
                    });
                    continue;
                }
            };

            exec.counts.requested += raw.actions.len();
            let mut actions = Vec::with_capacity(raw.actions.len());
            for value in &raw.actions {
                let checked = Action::decode(value).and_then(|action| {
                    validate_action(&action, state, &settings.bounds).map(|()| action)
                });
                match checked {
                    Ok(action) => actions.push(action),
                    Err(rejection) => {
                        let op = value
                            .get("op")
                            .and_then(|v| v.as_str())
                            .unwrap_or("<missing>")
                            .to_string();
                        obs::emit_action_dropped(iteration, task.domain, &op, &rejection);
                        exec.dropped.push(DroppedAction {
                            stage: DropStage::Validation,
                            domain: task.domain,
                            task_id: task.task_id.clone(),
                            op,
                            reason: rejection.to_string(),
                        });
                    }
                }
            }
            exec.counts.validated += actions.len();

            exec.traces.push(ProposalTrace {
                task_id: task.task_id.clone(),
                domain: task.domain,
                reasoning: raw.reasoning.clone(),
                confidence: raw.confidence,
                action_count: actions.len(),
            });
            proposals.push(AgentProposal {
                task_index: outcome.task_index,
                task_id: task.task_id.clone(),
                domain: task.domain,
                reasoning: raw.reasoning,
                actions,
                predicted_metrics: raw.predicted_metrics,
                confidence: raw.confidence,
            });
        }

        // Predicted metrics: the highest-priority domain speaks first.
        let mut by_priority: Vec<&AgentProposal> = proposals.iter().collect();
        by_priority.sort_by_key(|p| (settings.priority_rank(p.domain), p.task_index));
        for p in by_priority {
            for (k, v) in &p.predicted_metrics {
                exec.predicted_metrics.entry(k.clone()).or_insert(*v);
            }
        }

        let merged = merge_proposals(&proposals, settings);
        for c in &merged.conflicts {
            obs::emit_conflict_resolved(iteration, c);
        }
        exec.actions = merged.actions;
        exec.dropped.extend(merged.dropped);
        exec.conflicts = merged.conflicts;
        exec.counts.admitted = exec.actions.len();

        info!(
            iteration,
            requested = exec.counts.requested,
            validated = exec.counts.validated,
            admitted = exec.counts.admitted,
            conflicts = exec.conflicts.len(),
            "execution plan assembled"
        );
        exec
    }
}
