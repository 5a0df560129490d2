//! Feasibility and no-op gate.
//!
//! Two ordered pre-checks decide whether a candidate is worth an expensive
//! physics evaluation:
//! 1. geometric feasibility (collisions, minimum clearance)
//! 2. no-op detection (fingerprint unchanged from the parent)
//!
//! Neither check touches the physics oracle. Rejections are ordinary
//! outcomes, not errors.

use serde::{Deserialize, Serialize};

use satforge_state::DesignState;

use crate::config::ConstraintThresholds;
use crate::domain::{Result, StateFingerprint};
use crate::ports::{GeometryMetrics, LayoutEngine};

/// Why a candidate was turned away before evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateRejection {
    #[error("infeasible: {collision_count} collisions, min clearance {min_clearance_mm:.3} mm (need {required_mm} mm)")]
    Infeasible {
        collision_count: u32,
        min_clearance_mm: f64,
        required_mm: f64,
    },

    #[error("no-op: candidate fingerprint matches parent")]
    NoOp { fingerprint: String },
}

impl GateRejection {
    pub fn label(&self) -> &'static str {
        match self {
            GateRejection::Infeasible { .. } => "infeasible",
            GateRejection::NoOp { .. } => "no_op",
        }
    }
}

/// Outcome of screening one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Pass { geometry: GeometryMetrics },
    Reject(GateRejection),
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, GateVerdict::Pass { .. })
    }
}

/// Reject when any collision exists or clearance is under the threshold.
pub fn check_feasibility(
    geometry: &GeometryMetrics,
    thresholds: &ConstraintThresholds,
) -> std::result::Result<(), GateRejection> {
    if geometry.collision_count > 0 || geometry.min_clearance_mm < thresholds.min_clearance_mm {
        return Err(GateRejection::Infeasible {
            collision_count: geometry.collision_count,
            min_clearance_mm: geometry.min_clearance_mm,
            required_mm: thresholds.min_clearance_mm,
        });
    }
    Ok(())
}

/// Reject when the candidate is indistinguishable from its parent.
///
/// Both the structural fingerprint (position, orientation, dimensions) and
/// the surface fingerprint (envelope, material, thermal attachments) must
/// match for the candidate to count as a no-op.
pub fn detect_noop(
    parent: &DesignState,
    candidate: &DesignState,
) -> Result<std::result::Result<(), GateRejection>> {
    let before = StateFingerprint::of(parent)?;
    let after = StateFingerprint::of(candidate)?;
    if before == after {
        return Ok(Err(GateRejection::NoOp {
            fingerprint: after.structural,
        }));
    }
    Ok(Ok(()))
}

/// Run feasibility, then no-op detection.
pub fn screen(
    layout: &dyn LayoutEngine,
    parent: &DesignState,
    candidate: &DesignState,
    thresholds: &ConstraintThresholds,
) -> Result<GateVerdict> {
    let geometry = layout.geometry_metrics(candidate);
    if let Err(rejection) = check_feasibility(&geometry, thresholds) {
        return Ok(GateVerdict::Reject(rejection));
    }
    if let Err(rejection) = detect_noop(parent, candidate)? {
        return Ok(GateVerdict::Reject(rejection));
    }
    Ok(GateVerdict::Pass { geometry })
}
