//! Satforge-State: design-state model and state version store
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: immutable snapshots, version-tree integrity, and an append-only
//! audit trail.
//!
//! ## Key Components
//!
//! - `DesignState`: immutable layout snapshot with parent link
//! - `EvaluationResult`: scored outcome of evaluating a state
//! - `StateStore`: pool of every evaluated state (`put` / `get` / `best`)
//! - `AuditSink`: write-only per-iteration audit trail

mod error;
pub mod fakes;
pub mod jsonl_audit;
pub mod schema;
pub mod storage_traits;

pub use error::StoreError;
pub use fakes::{MemoryAuditSink, MemoryStateStore};
pub use jsonl_audit::JsonlAuditSink;
pub use schema::{
    metric, Axis, Component, DesignState, Envelope, EvaluationResult, Heatsink, KeepoutZone,
    MetricMap, StateId, Vec3, ViolationKind, ViolationRecord,
};
pub use storage_traits::{
    AuditEntry, AuditKind, AuditSink, PoolEntry, StateStore, StoreResult,
};
