//! Satforge Core Library
//!
//! The iterative layout optimization control loop: penalty scoring,
//! feasibility and no-op gating, rollback, multi-agent plan coordination,
//! and adaptive action execution. External oracles are reached only through
//! the traits in [`ports`].

pub mod config;
pub mod context;
pub mod coordinator;
pub mod domain;
pub mod executor;
pub mod fakes;
pub mod gate;
pub mod metrics;
pub mod obs;
pub mod ports;
pub mod rollback;
pub mod scoring;
pub mod session;
pub mod telemetry;

pub use config::{
    ActionBounds, ConfigError, ConstraintThresholds, ContextConfig, CoordinatorConfig,
    ExecutorConfig, OptimizerConfig, OracleTimeouts, ParameterCascades, PenaltyWeights,
    RollbackPolicy,
};

pub use context::{ContextBuilder, FailureKind, FailureNote, ReasoningContext, RollbackWarning};

pub use coordinator::{
    actions_conflict, dispatch_parallel, merge_proposals, validate_action, Coordinator,
    DispatchOutcome, MergeOutcome,
};

pub use domain::{
    Action, ActionCounts, ActionRejection, AgentProposal, ConflictRecord, Domain, DropStage,
    DroppedAction, EffectClass, ExecutionPlan, PlannedAction, ProposalTrace, RawProposal, Result,
    SatforgeError, StateFingerprint, StrategicPlan, StrategyKind, SubTask,
};

pub use executor::{
    ActionExecutor, ActionOutcome, CascadeReport, ExecutionReport, MaterialQuantity,
    ParameterBinding,
};

pub use gate::{check_feasibility, detect_noop, screen, GateRejection, GateVerdict};

pub use metrics::{LoopMetrics, MetricsSnapshot};

pub use ports::{
    DomainProposer, GeometryMetrics, KnowledgeBase, KnowledgeItem, LayoutEngine, OracleError,
    ParameterTarget, PhysicsOracle, SimulationReport, StrategicReasoner,
};

pub use rollback::{ControllerState, RollbackController, RollbackEvent, RollbackTrigger};

pub use scoring::{check_violations, compute_penalty, Evaluator};

pub use session::{Collaborators, OptimizationOutcome, OptimizationSession, Termination};

pub use telemetry::init_tracing;

pub use satforge_state::{
    Component, DesignState, Envelope, EvaluationResult, KeepoutZone, MetricMap, StateId, Vec3,
};
