//! Error types for satforge-state

use thiserror::Error;

/// Errors raised by the state version store and audit sinks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Lookup of a state id that was never stored
    #[error("state not found: {state_id}")]
    NotFound { state_id: String },

    /// A second `put` with an id already present in the pool
    #[error("duplicate state id: {state_id}")]
    DuplicateStateId { state_id: String },

    /// The state names a parent that the pool has never seen
    #[error("state {state_id} references unknown parent {parent_id}")]
    OrphanState { state_id: String, parent_id: String },

    /// The evaluation result was produced for a different state
    #[error("result for {result_state_id} cannot be stored under {state_id}")]
    MismatchedResult {
        state_id: String,
        result_state_id: String,
    },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("I/O failed: {0}")]
    Io(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}
