//! Domain models for satforge.
//!
//! Canonical definitions for the core entities:
//! - `Action`: typed layout/material edit, decoded at the proposal boundary
//! - `StrategicPlan` / `SubTask`: per-iteration task assignment
//! - `AgentProposal`: one domain's validated answer to a sub-task
//! - `ExecutionPlan`: the conflict-free action set applied in an iteration

pub mod action;
pub mod digest;
pub mod error;
pub mod plan;

pub use action::{Action, EffectClass, OperatorDomain, KNOWN_OPERATORS};
pub use digest::{structural_fingerprint, surface_fingerprint, StateFingerprint};
pub use error::{ActionRejection, Result, SatforgeError};
pub use plan::{
    ActionCounts, AgentProposal, ConflictRecord, Domain, DropStage, DroppedAction, ExecutionPlan,
    PlannedAction, ProposalTrace, RawProposal, StrategicPlan, StrategyKind, SubTask,
};
