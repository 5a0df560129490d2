//! Strategic plans, agent proposals, and the merged execution plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use satforge_state::MetricMap;

use crate::domain::action::Action;

/// Engineering discipline a proposer is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Geometry,
    Thermal,
    Structural,
    Power,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Domain::Geometry => "geometry",
            Domain::Thermal => "thermal",
            Domain::Structural => "structural",
            Domain::Power => "power",
        };
        write!(f, "{s}")
    }
}

/// Coarse strategy chosen by the strategic reasoner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LocalSearch,
    GlobalReconfig,
    Hybrid,
}

/// One unit of delegated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub task_id: String,
    pub domain: Domain,
    pub objective: String,
    /// Component ids the task is scoped to (empty means unrestricted)
    #[serde(default)]
    pub focus: Vec<String>,
}

impl SubTask {
    pub fn new(task_id: impl Into<String>, domain: Domain, objective: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            domain,
            objective: objective.into(),
            focus: Vec::new(),
        }
    }
}

/// Per-iteration plan from the strategic reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicPlan {
    pub strategy: StrategyKind,
    pub reasoning: String,
    pub tasks: Vec<SubTask>,
}

/// A proposal exactly as a domain proposer returned it. Actions are still
/// untyped; they are decoded one by one at the coordinator boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProposal {
    pub reasoning: String,
    pub actions: Vec<serde_json::Value>,
    #[serde(default)]
    pub predicted_metrics: MetricMap,
    pub confidence: f64,
}

/// A proposal whose surviving actions decoded and validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProposal {
    pub task_index: usize,
    pub task_id: String,
    pub domain: Domain,
    pub reasoning: String,
    pub actions: Vec<Action>,
    pub predicted_metrics: MetricMap,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// An action admitted into the execution plan, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action: Action,
    pub domain: Domain,
    pub task_index: usize,
    pub task_id: String,
    pub confidence: f64,
}

/// Where an action was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropStage {
    Validation,
    Duplicate,
    Conflict,
    Execution,
}

/// An action that did not make it into the applied state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedAction {
    pub stage: DropStage,
    pub domain: Domain,
    pub task_id: String,
    /// Operator tag, or the raw tag text for undecodable entries
    pub op: String,
    pub reason: String,
}

/// A resolved cross-proposal conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub kept: String,
    pub kept_domain: Domain,
    pub dropped: String,
    pub dropped_domain: Domain,
    pub reason: String,
}

/// Reasoning retained for audit once live proposals are discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalTrace {
    pub task_id: String,
    pub domain: Domain,
    pub reasoning: String,
    pub confidence: f64,
    pub action_count: usize,
}

/// Bookkeeping for one iteration's actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    /// Actions returned by proposers
    pub requested: usize,
    /// Actions that decoded and passed validation
    pub validated: usize,
    /// Actions left after de-duplication and conflict resolution
    pub admitted: usize,
    /// Actions the executor actually applied
    pub executed: usize,
    /// Applied actions that changed the state fingerprint
    pub effective: usize,
}

/// The conflict-free action set applied in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub iteration: u32,
    pub actions: Vec<PlannedAction>,
    pub dropped: Vec<DroppedAction>,
    pub conflicts: Vec<ConflictRecord>,
    pub predicted_metrics: BTreeMap<String, f64>,
    pub traces: Vec<ProposalTrace>,
    pub counts: ActionCounts,
    /// Set by the executor once the candidate is built
    pub state_changed: bool,
}

impl ExecutionPlan {
    pub fn empty(iteration: u32) -> Self {
        Self {
            iteration,
            actions: Vec::new(),
            dropped: Vec::new(),
            conflicts: Vec::new(),
            predicted_metrics: BTreeMap::new(),
            traces: Vec::new(),
            counts: ActionCounts::default(),
            state_changed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Display strings for every admitted action.
    pub fn action_labels(&self) -> Vec<String> {
        self.actions.iter().map(|p| p.action.to_string()).collect()
    }
}
