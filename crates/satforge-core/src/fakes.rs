//! Deterministic collaborator doubles.
//!
//! Provides `AabbLayout` (axis-aligned box geometry), `ScriptedPhysics`,
//! `ScriptedReasoner`, `ScriptedProposer`, `StaticKnowledge`, and
//! `FailingAuditSink`. They satisfy the port contracts without any external
//! process, so tests and embedders can drive a full session in memory.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use satforge_state::{
    metric, AuditEntry, AuditSink, Axis, Component, DesignState, Heatsink, MetricMap,
    StoreError, StoreResult, Vec3,
};

use crate::context::ReasoningContext;
use crate::domain::{Action, Domain, RawProposal, StrategicPlan, SubTask};
use crate::ports::{
    DomainProposer, GeometryMetrics, KnowledgeBase, KnowledgeItem, LayoutEngine, OracleError,
    ParameterTarget, PhysicsOracle, SimulationReport, StrategicReasoner,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// AabbLayout
// ---------------------------------------------------------------------------

/// Geometry over axis-aligned boxes.
///
/// Rotations are snapped to quarter turns when computing extents. Collisions
/// count overlapping component pairs, keep-out intrusions, and components
/// poking through the envelope's inner wall. Clearance is the smallest gap
/// between any two boxes or between a box and the inner wall.
#[derive(Debug, Clone, Copy, Default)]
pub struct AabbLayout;

impl AabbLayout {
    pub fn new() -> Self {
        Self
    }
}

fn overlaps(a_min: Vec3, a_max: Vec3, b_min: Vec3, b_max: Vec3) -> bool {
    Axis::ALL
        .iter()
        .all(|&ax| a_min.get(ax) < b_max.get(ax) && b_min.get(ax) < a_max.get(ax))
}

fn box_gap(a: &Component, b: &Component) -> f64 {
    let (a_min, a_max) = (a.min_corner(), a.max_corner());
    let (b_min, b_max) = (b.min_corner(), b.max_corner());
    let mut gap = Vec3::ZERO;
    for ax in Axis::ALL {
        let d = (b_min.get(ax) - a_max.get(ax))
            .max(a_min.get(ax) - b_max.get(ax))
            .max(0.0);
        gap = gap.with(ax, d);
    }
    gap.norm()
}

fn normalize_degrees(angle: f64) -> f64 {
    let a = angle.rem_euclid(360.0);
    if (a - 360.0).abs() < 1e-9 {
        0.0
    } else {
        a
    }
}

impl AabbLayout {
    fn repack(state: &mut DesignState, clearance: f64) {
        let inner_min = state.envelope.inner_min();
        let mut order: Vec<usize> = (0..state.components.len()).collect();
        order.sort_by(|&a, &b| state.components[a].id.cmp(&state.components[b].id));

        let mut cursor = inner_min.x + clearance;
        for idx in order {
            let c = &mut state.components[idx];
            let extent = c.effective_dimensions();
            c.position = Vec3::new(cursor + extent.x / 2.0, 0.0, 0.0);
            cursor += extent.x + clearance;
        }
    }

    fn translate(state: &mut DesignState, id: &str, delta: Vec3) {
        if let Some(c) = state.component_mut(id) {
            c.position = c.position.add(delta);
        }
    }

    fn rotate(state: &mut DesignState, id: &str, axis: Axis, angle: f64) {
        if let Some(c) = state.component_mut(id) {
            let turned = normalize_degrees(c.orientation.get(axis) + angle);
            c.orientation = c.orientation.with(axis, turned);
        }
    }
}

impl LayoutEngine for AabbLayout {
    fn apply_action(&self, state: &DesignState, action: &Action) -> DesignState {
        let mut next = state.child();
        match action {
            Action::Move { component, delta } => Self::translate(&mut next, component, *delta),
            Action::AdjustLayout { components, delta } => {
                for id in components {
                    Self::translate(&mut next, id, *delta);
                }
            }
            Action::Swap { component, other } => {
                let a = next.component(component).map(|c| c.position);
                let b = next.component(other).map(|c| c.position);
                if let (Some(pa), Some(pb)) = (a, b) {
                    if let Some(c) = next.component_mut(component) {
                        c.position = pb;
                    }
                    if let Some(c) = next.component_mut(other) {
                        c.position = pa;
                    }
                }
            }
            Action::Rotate {
                component,
                axis,
                angle_deg,
            }
            | Action::ChangeOrientation {
                component,
                axis,
                angle_deg,
            } => Self::rotate(&mut next, component, *axis, *angle_deg),
            Action::Deform {
                component,
                axis,
                magnitude_mm,
            } => {
                if let Some(c) = next.component_mut(component) {
                    let grown = (c.dimensions.get(*axis) + magnitude_mm).max(0.0);
                    c.dimensions = c.dimensions.with(*axis, grown);
                }
            }
            Action::Align {
                component,
                axis,
                reference,
            } => {
                if let Some(target) = next.component(reference).map(|c| c.position.get(*axis)) {
                    if let Some(c) = next.component_mut(component) {
                        c.position = c.position.with(*axis, target);
                    }
                }
            }
            Action::ChangeEnvelope { outer_size } => next.envelope.outer_size = *outer_size,
            Action::AddBracket {
                component,
                height_mm,
            } => {
                if let Some(c) = next.component_mut(component) {
                    // The bracket lifts the box by the change in mount height.
                    let lift = height_mm - c.bracket_height_mm.unwrap_or(0.0);
                    c.position.z += lift;
                    c.bracket_height_mm = Some(*height_mm);
                }
            }
            Action::Repack { clearance_mm } => Self::repack(&mut next, *clearance_mm),
            Action::ModifyCoating {
                component,
                emissivity,
                absorptivity,
                coating,
            } => {
                if let Some(c) = next.component_mut(component) {
                    if let Some(e) = emissivity {
                        c.emissivity = *e;
                    }
                    if let Some(a) = absorptivity {
                        c.absorptivity = *a;
                    }
                    if coating.is_some() {
                        c.coating = coating.clone();
                    }
                }
            }
            Action::AddHeatsink {
                component,
                face,
                thickness_mm,
                conductivity,
            } => {
                if let Some(c) = next.component_mut(component) {
                    c.heatsink = Some(Heatsink {
                        face: face.clone(),
                        thickness_mm: *thickness_mm,
                        conductivity: *conductivity,
                    });
                }
            }
            Action::SetThermalContact {
                component,
                contact_component,
                conductance,
            } => {
                if next.has_component(component) && next.has_component(contact_component) {
                    if let Some(c) = next.component_mut(component) {
                        c.thermal_contacts
                            .insert(contact_component.clone(), *conductance);
                    }
                    if let Some(c) = next.component_mut(contact_component) {
                        c.thermal_contacts.insert(component.clone(), *conductance);
                    }
                }
            }
        }
        next
    }

    fn geometry_metrics(&self, state: &DesignState) -> GeometryMetrics {
        let comps = &state.components;
        let inner_min = state.envelope.inner_min();
        let inner_max = state.envelope.inner_max();

        let mut collisions = 0u32;
        let mut min_clearance = f64::MAX;

        for (i, a) in comps.iter().enumerate() {
            let (a_min, a_max) = (a.min_corner(), a.max_corner());

            for b in &comps[i + 1..] {
                if overlaps(a_min, a_max, b.min_corner(), b.max_corner()) {
                    collisions += 1;
                }
                min_clearance = min_clearance.min(box_gap(a, b));
            }

            for zone in &state.keepouts {
                if overlaps(a_min, a_max, zone.min, zone.max) {
                    collisions += 1;
                }
            }

            let mut wall = f64::MAX;
            for ax in Axis::ALL {
                wall = wall
                    .min(a_min.get(ax) - inner_min.get(ax))
                    .min(inner_max.get(ax) - a_max.get(ax));
            }
            if wall < 0.0 {
                collisions += 1;
            }
            min_clearance = min_clearance.min(wall.max(0.0));
        }

        let total_mass = state.total_mass();
        let cg_offset_mm = if total_mass > 0.0 {
            comps
                .iter()
                .fold(Vec3::ZERO, |acc, c| acc.add(c.position.scale(c.mass_kg)))
                .scale(1.0 / total_mass)
                .norm()
        } else {
            0.0
        };

        GeometryMetrics {
            collision_count: collisions,
            min_clearance_mm: min_clearance,
            cg_offset_mm,
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedPhysics
// ---------------------------------------------------------------------------

/// Physics double that replays a temperature script.
///
/// Call `n` reports the `n`-th scripted temperature as `max_temp`; once the
/// script runs out the last value repeats. Calls listed in `failing_calls`
/// fail instead. Parameter writes succeed only for accepted names.
#[derive(Debug, Default)]
pub struct ScriptedPhysics {
    temperatures: Vec<f64>,
    failing_calls: HashSet<usize>,
    accepted_names: Option<HashSet<String>>,
    delay: Option<Duration>,
    evaluate_calls: AtomicUsize,
    parameter_attempts: Mutex<Vec<ParameterAttempt>>,
}

#[derive(Debug, Clone)]
struct ParameterAttempt {
    name: String,
    value: f64,
    accepted: bool,
}

impl ScriptedPhysics {
    pub fn new(temperatures: impl IntoIterator<Item = f64>) -> Self {
        Self {
            temperatures: temperatures.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Make the `call`-th evaluation (zero-based) fail.
    pub fn failing_on(mut self, call: usize) -> Self {
        self.failing_calls.insert(call);
        self
    }

    /// Restrict parameter writes to these names. All names are accepted otherwise.
    pub fn accepting<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Sleep before answering each evaluation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn evaluate_calls(&self) -> usize {
        self.evaluate_calls.load(Ordering::SeqCst)
    }

    /// Every parameter name tried, in order.
    pub fn parameter_attempts(&self) -> Vec<String> {
        lock(&self.parameter_attempts)
            .iter()
            .map(|a| a.name.clone())
            .collect()
    }

    /// Accepted writes as `(name, value)`, in order.
    pub fn parameter_writes(&self) -> Vec<(String, f64)> {
        lock(&self.parameter_attempts)
            .iter()
            .filter(|a| a.accepted)
            .map(|a| (a.name.clone(), a.value))
            .collect()
    }
}

#[async_trait]
impl PhysicsOracle for ScriptedPhysics {
    async fn evaluate(&self, _state: &DesignState) -> Result<SimulationReport, OracleError> {
        let call = self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_calls.contains(&call) {
            return Err(OracleError::Failed(format!("solver diverged on call {call}")));
        }
        let temp = self
            .temperatures
            .get(call)
            .or_else(|| self.temperatures.last())
            .copied()
            .ok_or_else(|| OracleError::Unavailable("no temperatures scripted".to_string()))?;

        let mut metrics = MetricMap::new();
        metrics.insert(metric::MAX_TEMP.to_string(), temp);
        Ok(SimulationReport { metrics })
    }

    async fn try_set_parameter(
        &self,
        _target: &ParameterTarget,
        name: &str,
        value: f64,
    ) -> Result<(), OracleError> {
        let accepted = self
            .accepted_names
            .as_ref()
            .map_or(true, |names| names.contains(name));
        lock(&self.parameter_attempts).push(ParameterAttempt {
            name: name.to_string(),
            value,
            accepted,
        });
        if accepted {
            Ok(())
        } else {
            Err(OracleError::Rejected(format!("unknown parameter '{name}'")))
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptedReasoner
// ---------------------------------------------------------------------------

/// Reasoner double that pops scripted answers and records every context.
///
/// When the script is exhausted the fallback plan is returned, or
/// `Unavailable` if there is none.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<Result<StrategicPlan, OracleError>>>,
    fallback: Option<StrategicPlan>,
    contexts: Mutex<Vec<ReasoningContext>>,
}

impl ScriptedReasoner {
    /// Answer every call with the same plan.
    pub fn repeating(plan: StrategicPlan) -> Self {
        Self {
            fallback: Some(plan),
            ..Self::default()
        }
    }

    pub fn scripted(answers: impl IntoIterator<Item = Result<StrategicPlan, OracleError>>) -> Self {
        Self {
            script: Mutex::new(answers.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, plan: StrategicPlan) -> Self {
        self.fallback = Some(plan);
        self
    }

    pub fn contexts(&self) -> Vec<ReasoningContext> {
        lock(&self.contexts).clone()
    }
}

#[async_trait]
impl StrategicReasoner for ScriptedReasoner {
    async fn plan(&self, context: &ReasoningContext) -> Result<StrategicPlan, OracleError> {
        lock(&self.contexts).push(context.clone());
        if let Some(answer) = lock(&self.script).pop_front() {
            return answer;
        }
        self.fallback
            .clone()
            .ok_or_else(|| OracleError::Unavailable("reasoner script exhausted".to_string()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedProposer
// ---------------------------------------------------------------------------

/// Proposer double for one domain.
///
/// Scripted responses are consumed first; afterwards every call returns the
/// default proposal built from `actions`.
#[derive(Debug)]
pub struct ScriptedProposer {
    domain: Domain,
    default: Result<RawProposal, OracleError>,
    script: Mutex<VecDeque<Result<RawProposal, OracleError>>>,
    delay: Option<Duration>,
    tasks: Mutex<Vec<SubTask>>,
}

impl ScriptedProposer {
    pub fn new(domain: Domain, actions: Vec<serde_json::Value>) -> Self {
        Self {
            domain,
            default: Ok(RawProposal {
                reasoning: format!("{domain} proposal"),
                actions,
                predicted_metrics: MetricMap::new(),
                confidence: 0.8,
            }),
            script: Mutex::new(VecDeque::new()),
            delay: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A proposer whose every call fails with `error`.
    pub fn failing(domain: Domain, error: OracleError) -> Self {
        Self {
            default: Err(error),
            ..Self::new(domain, Vec::new())
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        if let Ok(p) = &mut self.default {
            p.confidence = confidence;
        }
        self
    }

    pub fn with_predicted(mut self, name: &str, value: f64) -> Self {
        if let Ok(p) = &mut self.default {
            p.predicted_metrics.insert(name.to_string(), value);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn then(self, response: Result<RawProposal, OracleError>) -> Self {
        lock(&self.script).push_back(response);
        self
    }

    /// Sub-tasks received so far.
    pub fn tasks(&self) -> Vec<SubTask> {
        lock(&self.tasks).clone()
    }
}

#[async_trait]
impl DomainProposer for ScriptedProposer {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn propose(
        &self,
        task: &SubTask,
        _state: &DesignState,
        _metrics: &MetricMap,
    ) -> Result<RawProposal, OracleError> {
        lock(&self.tasks).push(task.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = lock(&self.script).pop_front();
        scripted.unwrap_or_else(|| self.default.clone())
    }
}

// ---------------------------------------------------------------------------
// StaticKnowledge
// ---------------------------------------------------------------------------

/// Knowledge base returning a fixed ranked list, truncated to `top_k`.
#[derive(Debug, Default)]
pub struct StaticKnowledge {
    items: Vec<KnowledgeItem>,
    queries: Mutex<Vec<String>>,
}

impl StaticKnowledge {
    pub fn new(items: Vec<KnowledgeItem>) -> Self {
        Self {
            items,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledge {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<KnowledgeItem>, OracleError> {
        lock(&self.queries).push(query.to_string());
        let mut ranked = self.items.clone();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(top_k);
        Ok(ranked)
    }
}

// ---------------------------------------------------------------------------
// FailingAuditSink
// ---------------------------------------------------------------------------

/// Audit sink whose every write fails.
#[derive(Debug, Default)]
pub struct FailingAuditSink {
    attempts: AtomicUsize,
}

impl FailingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, _entry: AuditEntry) -> StoreResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Io("audit volume is read-only".to_string()))
    }
}
