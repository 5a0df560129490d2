//! Storage trait definitions for satforge
//!
//! These traits define the core storage abstractions:
//! - `StateStore`: the state pool (every evaluated state, keyed by id)
//! - `AuditSink`: write-only per-iteration audit trail
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module; `jsonl_audit` offers a file-backed sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::schema::{DesignState, EvaluationResult, StateId};

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// StateStore: state version store
// ---------------------------------------------------------------------------

/// One pooled (state, result) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Insertion order within the pool, starting at 0
    pub seq: u64,
    pub state: DesignState,
    pub result: EvaluationResult,
}

impl PoolEntry {
    pub fn penalty(&self) -> f64 {
        self.result.penalty
    }
}

/// The state pool.
///
/// Guarantees:
/// - Entries are never removed during a run.
/// - `put` rejects a duplicate `state_id` with `DuplicateStateId`.
/// - `put` rejects a state whose `parent_id` is not already pooled, so the
///   ancestry chain of every entry is always present.
/// - `best()` returns the minimum-penalty entry, earliest insertion on ties.
/// - `get` fails with `NotFound` for unknown ids.
///
/// Writers are expected to be a single control loop; readers may be concurrent.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a state together with its evaluation.
    async fn put(&self, state: DesignState, result: EvaluationResult) -> StoreResult<()>;

    /// Exact lookup. Returns `StoreError::NotFound` if absent.
    async fn get(&self, state_id: &StateId) -> StoreResult<PoolEntry>;

    /// Minimum-penalty entry, or `None` on an empty pool.
    async fn best(&self) -> StoreResult<Option<PoolEntry>>;

    /// Check whether an id is pooled.
    async fn contains(&self, state_id: &StateId) -> StoreResult<bool>;

    /// Number of pooled entries.
    async fn len(&self) -> StoreResult<usize>;

    /// Ancestry chain starting at `state_id`, newest first, ending at a root.
    async fn lineage(&self, state_id: &StateId) -> StoreResult<Vec<StateId>>;

    /// All entries in insertion order.
    async fn entries(&self) -> StoreResult<Vec<PoolEntry>>;
}

// ---------------------------------------------------------------------------
// AuditSink: write-only audit trail
// ---------------------------------------------------------------------------

/// What an audit entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SessionStarted,
    IterationContext,
    StrategicPlan,
    PlanFailed,
    ExecutionPlan,
    GateRejected,
    Evaluation,
    Rollback,
    SessionFinished,
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence number within the session
    pub seq: u64,
    pub session_id: String,
    pub iteration: u32,
    pub kind: AuditKind,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Write-only audit sink.
///
/// Callers treat failures as non-fatal: a sink error is logged and the
/// control loop carries on.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> StoreResult<()>;
}
