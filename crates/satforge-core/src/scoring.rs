//! Evaluation and penalty scoring.
//!
//! [`Evaluator::evaluate`] merges cheap geometry metrics with physics output
//! and scores the result. Physics failures and timeouts never escape: they
//! become a failed [`EvaluationResult`] carrying the configured failure
//! penalty, so the loop can treat them as a very bad score. A report with a
//! NaN or infinite metric counts as a diverged run and fails the same way.

use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use satforge_state::{
    metric, DesignState, EvaluationResult, MetricMap, ViolationKind, ViolationRecord,
};

use crate::config::{ConstraintThresholds, OptimizerConfig};
use crate::ports::{GeometryMetrics, LayoutEngine, OracleError, PhysicsOracle};

/// List every broken constraint in `metrics`.
pub fn check_violations(
    metrics: &MetricMap,
    thresholds: &ConstraintThresholds,
) -> Vec<ViolationRecord> {
    let mut violations = Vec::new();
    let mut push = |kind, name: &str, value: f64, threshold: f64| {
        violations.push(ViolationRecord {
            kind,
            metric: name.to_string(),
            value,
            threshold,
            components: Vec::new(),
        });
    };

    if let Some(&collisions) = metrics.get(metric::COLLISION_COUNT) {
        if collisions > 0.0 {
            push(ViolationKind::Collision, metric::COLLISION_COUNT, collisions, 0.0);
        }
    }
    if let Some(&temp) = metrics.get(metric::MAX_TEMP) {
        if temp > thresholds.max_temp_c {
            push(
                ViolationKind::ThermalOverheat,
                metric::MAX_TEMP,
                temp,
                thresholds.max_temp_c,
            );
        }
    }
    if let Some(&clearance) = metrics.get(metric::MIN_CLEARANCE) {
        if clearance < thresholds.min_clearance_mm {
            push(
                ViolationKind::Clearance,
                metric::MIN_CLEARANCE,
                clearance,
                thresholds.min_clearance_mm,
            );
        }
    }
    if let Some(&cg) = metrics.get(metric::CG_OFFSET) {
        if cg > thresholds.max_cg_offset_mm {
            push(
                ViolationKind::CgOffset,
                metric::CG_OFFSET,
                cg,
                thresholds.max_cg_offset_mm,
            );
        }
    }
    if let (Some(limit), Some(&mass)) = (thresholds.max_total_mass_kg, metrics.get(metric::TOTAL_MASS)) {
        if mass > limit {
            push(ViolationKind::MassLimit, metric::TOTAL_MASS, mass, limit);
        }
    }
    if let (Some(limit), Some(&power)) = (thresholds.max_total_power_w, metrics.get(metric::TOTAL_POWER)) {
        if power > limit {
            push(ViolationKind::PowerLimit, metric::TOTAL_POWER, power, limit);
        }
    }

    violations
}

/// Weighted penalty:
/// `violations × W1 + (temp − T)+ × W2 + (C − clearance)+ × W3 + (cg − G)+ × W4`.
///
/// Missing metrics contribute nothing to their overshoot term.
pub fn compute_penalty(
    metrics: &MetricMap,
    violation_count: usize,
    config: &OptimizerConfig,
) -> f64 {
    let t = &config.thresholds;
    let w = &config.weights;
    let value = |name: &str| metrics.get(name).copied();

    let temp_over = value(metric::MAX_TEMP).map_or(0.0, |v| (v - t.max_temp_c).max(0.0));
    let clearance_under =
        value(metric::MIN_CLEARANCE).map_or(0.0, |v| (t.min_clearance_mm - v).max(0.0));
    let cg_over = value(metric::CG_OFFSET).map_or(0.0, |v| (v - t.max_cg_offset_mm).max(0.0));

    violation_count as f64 * w.violation
        + temp_over * w.temperature
        + clearance_under * w.clearance
        + cg_over * w.cg_offset
}

/// First metric whose value is NaN or infinite.
pub fn first_non_finite(metrics: &MetricMap) -> Option<(&str, f64)> {
    metrics
        .iter()
        .find(|(_, v)| !v.is_finite())
        .map(|(k, v)| (k.as_str(), *v))
}

/// Score a fully populated metric map.
pub fn score(
    state: &DesignState,
    iteration: u32,
    metrics: MetricMap,
    config: &OptimizerConfig,
) -> EvaluationResult {
    let violations = check_violations(&metrics, &config.thresholds);
    let penalty = compute_penalty(&metrics, violations.len(), config);
    EvaluationResult {
        state_id: state.state_id.clone(),
        iteration,
        success: true,
        metrics,
        violations,
        penalty,
        error: None,
        evaluated_at: Utc::now(),
    }
}

/// Synthesized result for a failed or timed-out evaluation.
pub fn failure_result(
    state: &DesignState,
    iteration: u32,
    error: &OracleError,
    config: &OptimizerConfig,
) -> EvaluationResult {
    EvaluationResult {
        state_id: state.state_id.clone(),
        iteration,
        success: false,
        metrics: MetricMap::new(),
        violations: Vec::new(),
        penalty: config.failure_penalty,
        error: Some(error.to_string()),
        evaluated_at: Utc::now(),
    }
}

/// Geometry metrics plus mass and power totals, keyed by metric name.
pub fn geometry_metric_map(state: &DesignState, geometry: &GeometryMetrics) -> MetricMap {
    let mut metrics = MetricMap::new();
    metrics.insert(
        metric::COLLISION_COUNT.to_string(),
        f64::from(geometry.collision_count),
    );
    metrics.insert(metric::MIN_CLEARANCE.to_string(), geometry.min_clearance_mm);
    metrics.insert(metric::CG_OFFSET.to_string(), geometry.cg_offset_mm);
    metrics.insert(metric::TOTAL_MASS.to_string(), state.total_mass());
    metrics.insert(metric::TOTAL_POWER.to_string(), state.total_power());
    metrics
}

/// Runs the physics oracle under a timeout and scores the outcome.
pub struct Evaluator {
    layout: Arc<dyn LayoutEngine>,
    physics: Arc<dyn PhysicsOracle>,
    config: Arc<OptimizerConfig>,
}

impl Evaluator {
    pub fn new(
        layout: Arc<dyn LayoutEngine>,
        physics: Arc<dyn PhysicsOracle>,
        config: Arc<OptimizerConfig>,
    ) -> Self {
        Self {
            layout,
            physics,
            config,
        }
    }

    /// Evaluate one state. Never fails; oracle trouble yields a failed result.
    #[instrument(skip(self, state), fields(state_id = %state.state_id))]
    pub async fn evaluate(&self, state: &DesignState, iteration: u32) -> EvaluationResult {
        let limit = self.config.timeouts.physics();
        let outcome = match tokio::time::timeout(limit, self.physics.evaluate(state)).await {
            Ok(res) => res,
            Err(_) => Err(OracleError::timeout("physics evaluation", limit)),
        };

        match outcome {
            Ok(report) => {
                let geometry = self.layout.geometry_metrics(state);
                let mut metrics = geometry_metric_map(state, &geometry);
                // Physics output wins on shared keys.
                metrics.extend(report.metrics);
                if let Some((name, value)) = first_non_finite(&metrics) {
                    let e = OracleError::Failed(format!("non-finite metric {name} = {value}"));
                    warn!(error = %e, iteration, "evaluation diverged; assigning failure penalty");
                    return failure_result(state, iteration, &e, &self.config);
                }
                score(state, iteration, metrics, &self.config)
            }
            Err(e) => {
                warn!(error = %e, iteration, "evaluation failed; assigning failure penalty");
                failure_result(state, iteration, &e, &self.config)
            }
        }
    }
}
