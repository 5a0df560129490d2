//! Boundaries to external collaborators.
//!
//! The control loop only ever talks to these traits. Geometry is cheap and
//! synchronous; physics, reasoning, and retrieval are slow, fallible calls
//! that the loop wraps in timeouts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use satforge_state::{DesignState, MetricMap};

use crate::context::ReasoningContext;
use crate::domain::{Action, Domain, RawProposal, StrategicPlan, SubTask};

/// Failure of an external oracle call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("unparseable oracle response: {0}")]
    Parse(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("oracle failed: {0}")]
    Failed(String),
}

impl OracleError {
    pub fn timeout(operation: &str, after: std::time::Duration) -> Self {
        OracleError::Timeout {
            operation: operation.to_string(),
            after_ms: after.as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Layout / geometry
// ---------------------------------------------------------------------------

/// Cheap geometric summary of a state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryMetrics {
    pub collision_count: u32,
    pub min_clearance_mm: f64,
    pub cg_offset_mm: f64,
}

/// Spatial layout collaborator.
///
/// `apply_action` is pure and never refuses: an impossible edit simply
/// yields an infeasible state, which the gate checks separately.
pub trait LayoutEngine: Send + Sync {
    fn apply_action(&self, state: &DesignState, action: &Action) -> DesignState;

    fn geometry_metrics(&self, state: &DesignState) -> GeometryMetrics;
}

// ---------------------------------------------------------------------------
// Physics
// ---------------------------------------------------------------------------

/// Raw physics output for one state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationReport {
    pub metrics: MetricMap,
}

/// Which model entity a parameter write addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterTarget {
    pub component: String,
    /// Second body for pairwise quantities such as contact conductance
    pub counterpart: Option<String>,
}

/// Expensive, possibly failing physics simulator.
#[async_trait]
pub trait PhysicsOracle: Send + Sync {
    async fn evaluate(&self, state: &DesignState) -> Result<SimulationReport, OracleError>;

    /// Set one named model parameter. Unknown names fail with `Rejected`.
    async fn try_set_parameter(
        &self,
        target: &ParameterTarget,
        name: &str,
        value: f64,
    ) -> Result<(), OracleError>;
}

// ---------------------------------------------------------------------------
// Reasoning
// ---------------------------------------------------------------------------

/// Produces one strategic plan per iteration.
#[async_trait]
pub trait StrategicReasoner: Send + Sync {
    async fn plan(&self, context: &ReasoningContext) -> Result<StrategicPlan, OracleError>;
}

/// Answers sub-tasks for one discipline.
#[async_trait]
pub trait DomainProposer: Send + Sync {
    fn domain(&self) -> Domain;

    async fn propose(
        &self,
        task: &SubTask,
        state: &DesignState,
        metrics: &MetricMap,
    ) -> Result<RawProposal, OracleError>;
}

// ---------------------------------------------------------------------------
// Knowledge retrieval
// ---------------------------------------------------------------------------

/// A ranked reference item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub title: String,
    pub content: String,
    pub score: f64,
}

/// Read-only retrieval collaborator.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<KnowledgeItem>, OracleError>;
}
