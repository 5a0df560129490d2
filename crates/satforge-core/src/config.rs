//! Optimizer configuration with multi-source merging.
//!
//! One [`OptimizerConfig`] is shared by penalty scoring, violation checks,
//! the feasibility gate, the executor, and reasoning-context assembly, so a
//! constraint threshold has exactly one value per run.
//!
//! Priority (highest to lowest):
//! 1. `SATFORGE_*` environment variables (`__` separates nesting levels)
//! 2. TOML file passed to [`OptimizerConfig::load`]
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::domain::Domain;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Physical limits a design must respect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintThresholds {
    /// Maximum component temperature, °C
    pub max_temp_c: f64,
    /// Minimum gap between components and walls, mm
    pub min_clearance_mm: f64,
    /// Maximum centre-of-gravity offset from the envelope centre, mm
    pub max_cg_offset_mm: f64,
    pub max_total_mass_kg: Option<f64>,
    pub max_total_power_w: Option<f64>,
}

impl Default for ConstraintThresholds {
    fn default() -> Self {
        Self {
            max_temp_c: 60.0,
            min_clearance_mm: 3.0,
            max_cg_offset_mm: 50.0,
            max_total_mass_kg: None,
            max_total_power_w: None,
        }
    }
}

/// Penalty weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyWeights {
    /// Per violation
    pub violation: f64,
    /// Per °C above `max_temp_c`
    pub temperature: f64,
    /// Per mm below `min_clearance_mm`
    pub clearance: f64,
    /// Per mm above `max_cg_offset_mm`
    pub cg_offset: f64,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            violation: 100.0,
            temperature: 10.0,
            clearance: 50.0,
            cg_offset: 2.0,
        }
    }
}

/// When the rollback controller fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackPolicy {
    pub enabled: bool,
    /// Any penalty above this triggers a rollback
    pub penalty_ceiling: f64,
    /// Number of consecutive non-decreasing penalties that count as a plateau
    pub plateau_window: usize,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            penalty_ceiling: 1000.0,
            plateau_window: 3,
        }
    }
}

/// Equivalent parameter names tried in order against the physics oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterCascades {
    pub contact_conductance: Vec<String>,
    pub emissivity: Vec<String>,
    pub absorptivity: Vec<String>,
}

impl Default for ParameterCascades {
    fn default() -> Self {
        fn names(v: &[&str]) -> Vec<String> {
            v.iter().map(|s| s.to_string()).collect()
        }
        Self {
            contact_conductance: names(&["h_tc", "h_joint", "h"]),
            emissivity: names(&["epsilon_rad", "emissivity", "epsilon"]),
            absorptivity: names(&["alpha_s", "absorptivity", "solar_absorptivity"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Magnitude ladder for reposition actions, largest first
    pub scale_factors: Vec<f64>,
    pub cascades: ParameterCascades,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            scale_factors: vec![1.0, 0.5, 0.25, 0.1, 0.05],
            cascades: ParameterCascades::default(),
        }
    }
}

/// Declared parameter domains for proposal validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionBounds {
    pub max_translation_mm: f64,
    pub max_rotation_deg: f64,
    pub max_deform_mm: f64,
    pub max_bracket_height_mm: f64,
    pub max_repack_clearance_mm: f64,
    pub max_envelope_mm: f64,
    pub max_heatsink_thickness_mm: f64,
    pub max_conductivity: f64,
    pub max_conductance: f64,
}

impl Default for ActionBounds {
    fn default() -> Self {
        Self {
            max_translation_mm: 500.0,
            max_rotation_deg: 360.0,
            max_deform_mm: 100.0,
            max_bracket_height_mm: 200.0,
            max_repack_clearance_mm: 50.0,
            max_envelope_mm: 5000.0,
            max_heatsink_thickness_mm: 50.0,
            max_conductivity: 5000.0,
            max_conductance: 100_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Conflict winner order, highest priority first
    pub domain_priority: Vec<Domain>,
    /// Upper bound on concurrently running proposers
    pub max_concurrent: usize,
    pub bounds: ActionBounds,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            domain_priority: vec![
                Domain::Geometry,
                Domain::Thermal,
                Domain::Structural,
                Domain::Power,
            ],
            max_concurrent: 4,
            bounds: ActionBounds::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Rank of a domain; lower wins. Unlisted domains rank last.
    pub fn priority_rank(&self, domain: Domain) -> usize {
        self.domain_priority
            .iter()
            .position(|d| *d == domain)
            .unwrap_or(self.domain_priority.len())
    }
}

/// Timeouts for every external call, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleTimeouts {
    pub physics_ms: u64,
    pub parameter_ms: u64,
    pub planning_ms: u64,
    pub proposal_ms: u64,
    pub knowledge_ms: u64,
}

impl Default for OracleTimeouts {
    fn default() -> Self {
        Self {
            physics_ms: 300_000,
            parameter_ms: 30_000,
            planning_ms: 120_000,
            proposal_ms: 120_000,
            knowledge_ms: 10_000,
        }
    }
}

impl OracleTimeouts {
    pub fn physics(&self) -> Duration {
        Duration::from_millis(self.physics_ms)
    }

    pub fn parameter(&self) -> Duration {
        Duration::from_millis(self.parameter_ms)
    }

    pub fn planning(&self) -> Duration {
        Duration::from_millis(self.planning_ms)
    }

    pub fn proposal(&self) -> Duration {
        Duration::from_millis(self.proposal_ms)
    }

    pub fn knowledge(&self) -> Duration {
        Duration::from_millis(self.knowledge_ms)
    }
}

/// Reasoning-context assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// How many recent failures are replayed to the reasoner
    pub recent_failure_window: usize,
    /// Knowledge items requested per iteration; 0 disables retrieval
    pub knowledge_top_k: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_failure_window: 5,
            knowledge_top_k: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// OptimizerConfig
// ---------------------------------------------------------------------------

/// Main optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Iteration budget
    pub max_iterations: u32,
    pub thresholds: ConstraintThresholds,
    pub weights: PenaltyWeights,
    /// Penalty assigned to a failed or timed-out evaluation
    pub failure_penalty: f64,
    pub rollback: RollbackPolicy,
    pub executor: ExecutorConfig,
    pub coordinator: CoordinatorConfig,
    pub timeouts: OracleTimeouts,
    pub context: ContextConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            thresholds: ConstraintThresholds::default(),
            weights: PenaltyWeights::default(),
            failure_penalty: 9999.0,
            rollback: RollbackPolicy::default(),
            executor: ExecutorConfig::default(),
            coordinator: CoordinatorConfig::default(),
            timeouts: OracleTimeouts::default(),
            context: ContextConfig::default(),
        }
    }
}

impl OptimizerConfig {
    /// Environment variable prefix.
    pub const ENV_PREFIX: &'static str = "SATFORGE_";

    /// Load defaults, then `path` (which must exist when given), then the
    /// environment, and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(Self::ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Extract from an arbitrary figment and validate.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid("max_iterations", "must be at least 1"));
        }

        let ladder = &self.executor.scale_factors;
        if ladder.is_empty() {
            return Err(ConfigError::invalid(
                "executor.scale_factors",
                "must not be empty",
            ));
        }
        if ladder.iter().any(|f| !(*f > 0.0 && *f <= 1.0)) {
            return Err(ConfigError::invalid(
                "executor.scale_factors",
                "every factor must lie in (0, 1]",
            ));
        }
        if ladder.windows(2).any(|w| w[1] >= w[0]) {
            return Err(ConfigError::invalid(
                "executor.scale_factors",
                "must be strictly descending",
            ));
        }

        let cascades = &self.executor.cascades;
        for (field, names) in [
            ("executor.cascades.contact_conductance", &cascades.contact_conductance),
            ("executor.cascades.emissivity", &cascades.emissivity),
            ("executor.cascades.absorptivity", &cascades.absorptivity),
        ] {
            if names.is_empty() {
                return Err(ConfigError::invalid(field, "cascade must name at least one parameter"));
            }
        }

        let w = &self.weights;
        if [w.violation, w.temperature, w.clearance, w.cg_offset]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(ConfigError::invalid("weights", "weights must be finite and non-negative"));
        }
        if !self.failure_penalty.is_finite() || self.failure_penalty <= 0.0 {
            return Err(ConfigError::invalid("failure_penalty", "must be positive"));
        }

        if self.rollback.plateau_window < 2 {
            return Err(ConfigError::invalid(
                "rollback.plateau_window",
                "needs at least two observations",
            ));
        }

        if self.coordinator.domain_priority.is_empty() {
            return Err(ConfigError::invalid(
                "coordinator.domain_priority",
                "must not be empty",
            ));
        }
        if self.coordinator.max_concurrent == 0 {
            return Err(ConfigError::invalid(
                "coordinator.max_concurrent",
                "must be at least 1",
            ));
        }

        let t = &self.timeouts;
        if [t.physics_ms, t.parameter_ms, t.planning_ms, t.proposal_ms, t.knowledge_ms].contains(&0)
        {
            return Err(ConfigError::invalid("timeouts", "every timeout must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = OptimizerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.thresholds.max_temp_c, 60.0);
        assert_eq!(config.weights.violation, 100.0);
        assert_eq!(config.rollback.penalty_ceiling, 1000.0);
        assert_eq!(config.executor.scale_factors, vec![1.0, 0.5, 0.25, 0.1, 0.05]);
        assert_eq!(
            config.executor.cascades.contact_conductance,
            vec!["h_tc", "h_joint", "h"]
        );
    }

    #[test]
    fn test_rejects_ascending_ladder() {
        let mut config = OptimizerConfig::default();
        config.executor.scale_factors = vec![0.5, 1.0];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "executor.scale_factors"));
    }

    #[test]
    fn test_rejects_out_of_range_factor() {
        let mut config = OptimizerConfig::default();
        config.executor.scale_factors = vec![2.0, 1.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_cascade() {
        let mut config = OptimizerConfig::default();
        config.executor.cascades.emissivity.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_budget_and_short_plateau() {
        let mut config = OptimizerConfig::default();
        config.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = OptimizerConfig::default();
        config.rollback.plateau_window = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_priority_rank() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.priority_rank(Domain::Geometry), 0);
        assert_eq!(config.priority_rank(Domain::Power), 3);

        let partial = CoordinatorConfig {
            domain_priority: vec![Domain::Thermal],
            ..CoordinatorConfig::default()
        };
        assert_eq!(partial.priority_rank(Domain::Geometry), 1);
    }

    #[test]
    fn test_missing_explicit_file_is_fatal() {
        let err = OptimizerConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_from_figment_applies_overrides() {
        let figment = Figment::new()
            .merge(Serialized::defaults(OptimizerConfig::default()))
            .merge(Toml::string(
                r#"
                max_iterations = 7

                [thresholds]
                max_temp_c = 45.0

                [executor]
                scale_factors = [1.0, 0.3]
                "#,
            ));
        let config = OptimizerConfig::from_figment(figment).unwrap();
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.thresholds.max_temp_c, 45.0);
        assert_eq!(config.thresholds.min_clearance_mm, 3.0);
        assert_eq!(config.executor.scale_factors, vec![1.0, 0.3]);
        assert_eq!(config.executor.cascades, ParameterCascades::default());
    }
}
