//! Design-state data model
//!
//! Types:
//! - `DesignState`: immutable snapshot of a layout (components, envelope, keep-outs)
//! - `Component`: one physical box inside the envelope, with thermal attributes
//! - `EvaluationResult`: metrics, violations, and the scalar penalty for one state
//!
//! Lengths are millimetres, angles are degrees, masses kilograms, powers watts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric name to value mapping produced by geometry and physics evaluation.
pub type MetricMap = BTreeMap<String, f64>;

/// Well-known metric names shared by scoring, gating, and oracles.
pub mod metric {
    pub const MAX_TEMP: &str = "max_temp";
    pub const MIN_CLEARANCE: &str = "min_clearance";
    pub const CG_OFFSET: &str = "cg_offset";
    pub const COLLISION_COUNT: &str = "collision_count";
    pub const TOTAL_MASS: &str = "total_mass";
    pub const TOTAL_POWER: &str = "total_power";
}

// ---------------------------------------------------------------------------
// Geometry primitives
// ---------------------------------------------------------------------------

/// Cartesian triple.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, factor: f64) -> Vec3 {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn get(self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn with(self, axis: Axis, value: f64) -> Vec3 {
        let mut out = self;
        match axis {
            Axis::X => out.x = value,
            Axis::Y => out.y = value,
            Axis::Z => out.z = value,
        }
        out
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Principal axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// A heat sink bolted onto one face of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatsink {
    /// Face name, e.g. "+z"
    pub face: String,
    pub thickness_mm: f64,
    /// W/(m·K)
    pub conductivity: f64,
}

/// One component of the layout. `position` is the box centre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub position: Vec3,
    /// Euler angles in degrees
    pub orientation: Vec3,
    pub dimensions: Vec3,
    pub mass_kg: f64,
    pub power_w: f64,
    pub category: String,
    pub emissivity: f64,
    pub absorptivity: f64,
    pub coating: Option<String>,
    pub heatsink: Option<Heatsink>,
    pub bracket_height_mm: Option<f64>,
    /// Contact conductance to neighbouring components, keyed by component id
    pub thermal_contacts: BTreeMap<String, f64>,
}

impl Component {
    /// Create a component with default surface properties.
    pub fn new(id: impl Into<String>, position: Vec3, dimensions: Vec3) -> Self {
        Self {
            id: id.into(),
            position,
            orientation: Vec3::ZERO,
            dimensions,
            mass_kg: 1.0,
            power_w: 0.0,
            category: "payload".to_string(),
            emissivity: 0.8,
            absorptivity: 0.3,
            coating: None,
            heatsink: None,
            bracket_height_mm: None,
            thermal_contacts: BTreeMap::new(),
        }
    }

    /// Create a component from its min and max corners.
    pub fn from_bounds(id: impl Into<String>, min: Vec3, max: Vec3) -> Self {
        let dimensions = max.sub(min);
        let position = min.add(dimensions.scale(0.5));
        Self::new(id, position, dimensions)
    }

    pub fn with_mass(mut self, mass_kg: f64) -> Self {
        self.mass_kg = mass_kg;
        self
    }

    pub fn with_power(mut self, power_w: f64) -> Self {
        self.power_w = power_w;
        self
    }

    /// Dimensions after applying the orientation, snapped to quarter turns.
    ///
    /// An odd number of quarter turns about one axis swaps the extents of
    /// the other two.
    pub fn effective_dimensions(&self) -> Vec3 {
        let mut d = self.dimensions;
        for axis in Axis::ALL {
            let quarter_turns = (self.orientation.get(axis) / 90.0).round() as i64;
            if quarter_turns.rem_euclid(2) == 1 {
                d = match axis {
                    Axis::X => Vec3::new(d.x, d.z, d.y),
                    Axis::Y => Vec3::new(d.z, d.y, d.x),
                    Axis::Z => Vec3::new(d.y, d.x, d.z),
                };
            }
        }
        d
    }

    pub fn min_corner(&self) -> Vec3 {
        self.position.sub(self.effective_dimensions().scale(0.5))
    }

    pub fn max_corner(&self) -> Vec3 {
        self.position.add(self.effective_dimensions().scale(0.5))
    }
}

/// Outer envelope, centred on the origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub outer_size: Vec3,
    pub thickness: f64,
}

impl Envelope {
    pub fn new(outer_size: Vec3, thickness: f64) -> Self {
        Self {
            outer_size,
            thickness,
        }
    }

    pub fn inner_min(&self) -> Vec3 {
        self.outer_size.scale(-0.5).add(Vec3::new(
            self.thickness,
            self.thickness,
            self.thickness,
        ))
    }

    pub fn inner_max(&self) -> Vec3 {
        self.outer_size.scale(0.5).sub(Vec3::new(
            self.thickness,
            self.thickness,
            self.thickness,
        ))
    }
}

/// Forbidden region no component may overlap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepoutZone {
    pub tag: String,
    pub min: Vec3,
    pub max: Vec3,
}

// ---------------------------------------------------------------------------
// DesignState
// ---------------------------------------------------------------------------

/// Unique identifier for a design state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub String);

impl StateId {
    /// Generate a new random StateId
    pub fn new() -> Self {
        StateId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        StateId(s.to_string())
    }
}

/// Immutable layout snapshot.
///
/// States form a version tree through `parent_id`. Rollbacks re-parent new
/// work onto an older state, so the tree branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignState {
    pub state_id: StateId,
    pub parent_id: Option<StateId>,
    pub iteration: u32,
    pub components: Vec<Component>,
    pub envelope: Envelope,
    pub keepouts: Vec<KeepoutZone>,
}

impl DesignState {
    /// Create a root state (no parent) at iteration 0.
    pub fn root(components: Vec<Component>, envelope: Envelope) -> Self {
        Self {
            state_id: StateId::new(),
            parent_id: None,
            iteration: 0,
            components,
            envelope,
            keepouts: Vec::new(),
        }
    }

    pub fn with_keepouts(mut self, keepouts: Vec<KeepoutZone>) -> Self {
        self.keepouts = keepouts;
        self
    }

    /// Derive a copy with a fresh id whose parent is `self`.
    pub fn child(&self) -> Self {
        let mut next = self.clone();
        next.state_id = StateId::new();
        next.parent_id = Some(self.state_id.clone());
        next
    }

    /// Re-parent this state onto `parent` with a fresh id.
    ///
    /// Used after a chain of intermediate edits so the pooled candidate
    /// points directly at the working state it was derived from.
    pub fn rebase(mut self, parent: &DesignState, iteration: u32) -> Self {
        self.state_id = StateId::new();
        self.parent_id = Some(parent.state_id.clone());
        self.iteration = iteration;
        self
    }

    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn component_mut(&mut self, id: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.id == id)
    }

    pub fn has_component(&self, id: &str) -> bool {
        self.component(id).is_some()
    }

    pub fn total_mass(&self) -> f64 {
        self.components.iter().map(|c| c.mass_kg).sum()
    }

    pub fn total_power(&self) -> f64 {
        self.components.iter().map(|c| c.power_w).sum()
    }
}

// ---------------------------------------------------------------------------
// EvaluationResult
// ---------------------------------------------------------------------------

/// Kind of constraint a violation breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ThermalOverheat,
    Clearance,
    Collision,
    CgOffset,
    MassLimit,
    PowerLimit,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ViolationKind::ThermalOverheat => "thermal_overheat",
            ViolationKind::Clearance => "clearance",
            ViolationKind::Collision => "collision",
            ViolationKind::CgOffset => "cg_offset",
            ViolationKind::MassLimit => "mass_limit",
            ViolationKind::PowerLimit => "power_limit",
        };
        write!(f, "{s}")
    }
}

/// A single broken constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub kind: ViolationKind,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    /// Components implicated, when known
    pub components: Vec<String>,
}

/// Outcome of evaluating one state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub state_id: StateId,
    pub iteration: u32,
    pub success: bool,
    pub metrics: MetricMap,
    pub violations: Vec<ViolationRecord>,
    /// Lower is better
    pub penalty: f64,
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationResult {
    /// A successful evaluation with no remaining violations.
    pub fn is_converged(&self) -> bool {
        self.success && self.violations.is_empty()
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}
