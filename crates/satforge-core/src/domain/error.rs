//! Domain-level error taxonomy for satforge.

use satforge_state::StoreError;

use crate::config::ConfigError;

/// Why a single proposed action was refused at the coordinator boundary.
///
/// Rejections drop one action; the rest of its proposal survives.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionRejection {
    #[error("action has no \"op\" tag")]
    MissingOperator,

    #[error("unknown operator: {op}")]
    UnknownOperator { op: String },

    #[error("malformed {op} action: {reason}")]
    Malformed { op: String, reason: String },

    #[error("{op} references unknown component {component}")]
    UnknownComponent { op: String, component: String },

    #[error("{op}.{field} = {value} outside [{min}, {max}]")]
    OutOfRange {
        op: String,
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid {op} action: {reason}")]
    InvalidParameter { op: String, reason: String },
}

/// Fatal run-level errors. Everything else degrades gracefully inside the loop.
#[derive(Debug, thiserror::Error)]
pub enum SatforgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state id collision: {state_id}")]
    StateIdCollision { state_id: String },

    #[error("state store error: {0}")]
    Store(StoreError),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for SatforgeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateStateId { state_id } => {
                SatforgeError::StateIdCollision { state_id }
            }
            other => SatforgeError::Store(other),
        }
    }
}

/// Result type for satforge operations.
pub type Result<T> = std::result::Result<T, SatforgeError>;
