//! Adaptive action executor.
//!
//! Applies an [`ExecutionPlan`] to the working state, one action at a time:
//! - reposition actions (`MOVE`, `ROTATE`) walk the magnitude ladder and keep
//!   the first (largest) scale whose result passes the feasibility check
//! - material and contact actions walk the configured parameter-name cascade
//!   against the physics oracle and stop at the first accepted name
//! - everything else is applied as proposed
//!
//! A failed action is dropped on its own; the rest of the plan still runs.
//!
//! Parameter writes reach the oracle before the candidate is gated. The
//! executor remembers which name each quantity was accepted under, so
//! [`ActionExecutor::sync_parameters`] can push a kept state's values back
//! when a candidate is rejected or rolled back.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use satforge_state::DesignState;

use crate::config::OptimizerConfig;
use crate::domain::{Action, DropStage, DroppedAction, ExecutionPlan, Result, StateFingerprint};
use crate::gate::check_feasibility;
use crate::obs;
use crate::ports::{LayoutEngine, OracleError, ParameterTarget, PhysicsOracle};

/// Physical quantity a parameter cascade addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialQuantity {
    Emissivity,
    Absorptivity,
    ContactConductance,
}

impl MaterialQuantity {
    /// Value `state` holds for this quantity at `target`. A missing contact
    /// reads as zero conductance; a missing component has no value.
    pub fn value_in(&self, state: &DesignState, target: &ParameterTarget) -> Option<f64> {
        let component = state.component(&target.component)?;
        match self {
            MaterialQuantity::Emissivity => Some(component.emissivity),
            MaterialQuantity::Absorptivity => Some(component.absorptivity),
            MaterialQuantity::ContactConductance => {
                let other = target.counterpart.as_ref()?;
                Some(component.thermal_contacts.get(other).copied().unwrap_or(0.0))
            }
        }
    }
}

/// Name the oracle accepted for one quantity at one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBinding {
    pub target: ParameterTarget,
    pub quantity: MaterialQuantity,
    pub name: String,
}

/// What happened to one planned action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Applied {
        action: String,
        /// Ladder scale used, for reposition actions
        scale: Option<f64>,
        /// Accepted parameter names, for material actions
        parameters: Vec<String>,
        effective: bool,
    },
    Dropped {
        action: String,
        reason: String,
    },
}

/// Result of walking one parameter cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub accepted: Option<String>,
    /// Every name tried, in order, with its error if it failed
    pub attempts: Vec<(String, Option<String>)>,
}

/// Candidate state plus per-action bookkeeping.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub candidate: DesignState,
    pub outcomes: Vec<ActionOutcome>,
    /// Whether any parameter reached the physics oracle
    pub wrote_parameters: bool,
}

pub struct ActionExecutor {
    layout: Arc<dyn LayoutEngine>,
    physics: Arc<dyn PhysicsOracle>,
    config: Arc<OptimizerConfig>,
    bindings: Mutex<Vec<ParameterBinding>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl ActionExecutor {
    pub fn new(
        layout: Arc<dyn LayoutEngine>,
        physics: Arc<dyn PhysicsOracle>,
        config: Arc<OptimizerConfig>,
    ) -> Self {
        Self {
            layout,
            physics,
            config,
            bindings: Mutex::new(Vec::new()),
        }
    }

    /// Every accepted parameter name, one per target and quantity.
    pub fn bindings(&self) -> Vec<ParameterBinding> {
        lock(&self.bindings).clone()
    }

    fn bind(&self, target: &ParameterTarget, quantity: MaterialQuantity, name: &str) {
        let mut bindings = lock(&self.bindings);
        if let Some(existing) = bindings
            .iter_mut()
            .find(|b| &b.target == target && b.quantity == quantity)
        {
            existing.name = name.to_string();
            return;
        }
        bindings.push(ParameterBinding {
            target: target.clone(),
            quantity,
            name: name.to_string(),
        });
    }

    async fn write_parameter(
        &self,
        target: &ParameterTarget,
        name: &str,
        value: f64,
    ) -> std::result::Result<(), OracleError> {
        let limit = self.config.timeouts.parameter();
        match tokio::time::timeout(limit, self.physics.try_set_parameter(target, name, value)).await
        {
            Ok(r) => r,
            Err(_) => Err(OracleError::timeout("parameter write", limit)),
        }
    }

    /// Push the values `state` holds for every bound parameter back to the
    /// oracle. Failed writes are logged; returns how many were accepted.
    #[instrument(skip_all, fields(state_id = %state.state_id))]
    pub async fn sync_parameters(&self, state: &DesignState) -> usize {
        let bindings = self.bindings();
        let mut synced = 0;
        let mut failed = 0;
        for binding in &bindings {
            let Some(value) = binding.quantity.value_in(state, &binding.target) else {
                continue;
            };
            match self.write_parameter(&binding.target, &binding.name, value).await {
                Ok(()) => synced += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        component = %binding.target.component,
                        name = %binding.name,
                        error = %e,
                        "parameter resync failed"
                    );
                }
            }
        }
        if !bindings.is_empty() {
            obs::emit_parameters_synced(state.state_id.as_str(), synced, failed);
        }
        synced
    }

    /// Walk the magnitude ladder for a reposition action.
    ///
    /// Returns the first feasible state and the scale that produced it.
    pub fn apply_with_ladder(&self, state: &DesignState, action: &Action) -> Option<(DesignState, f64)> {
        for &scale in &self.config.executor.scale_factors {
            let attempt = action.scaled(scale);
            let next = self.layout.apply_action(state, &attempt);
            let geometry = self.layout.geometry_metrics(&next);
            match check_feasibility(&geometry, &self.config.thresholds) {
                Ok(()) => return Some((next, scale)),
                Err(rejection) => debug!(action = %action, scale, %rejection, "ladder step infeasible"),
            }
        }
        None
    }

    /// Try each name in `names` until the oracle accepts one.
    pub async fn set_with_cascade(
        &self,
        target: &ParameterTarget,
        names: &[String],
        value: f64,
    ) -> CascadeReport {
        let mut attempts = Vec::with_capacity(names.len());
        for name in names {
            match self.write_parameter(target, name, value).await {
                Ok(()) => {
                    attempts.push((name.clone(), None));
                    return CascadeReport {
                        accepted: Some(name.clone()),
                        attempts,
                    };
                }
                Err(e) => attempts.push((name.clone(), Some(e.to_string()))),
            }
        }
        CascadeReport {
            accepted: None,
            attempts,
        }
    }

    /// Push a material or contact action to the oracle. Returns the accepted
    /// names, or the reason the action has to be dropped.
    ///
    /// When a later cascade of the same action fails, the writes it already
    /// made are reverted to the values in `current`.
    async fn configure_material(
        &self,
        current: &DesignState,
        action: &Action,
    ) -> std::result::Result<Vec<String>, String> {
        let cascades = &self.config.executor.cascades;
        let mut writes: Vec<(ParameterTarget, MaterialQuantity, &[String], f64)> = Vec::new();
        match action {
            Action::ModifyCoating {
                component,
                emissivity,
                absorptivity,
                ..
            } => {
                let target = ParameterTarget {
                    component: component.clone(),
                    counterpart: None,
                };
                if let Some(e) = emissivity {
                    writes.push((
                        target.clone(),
                        MaterialQuantity::Emissivity,
                        cascades.emissivity.as_slice(),
                        *e,
                    ));
                }
                if let Some(a) = absorptivity {
                    writes.push((
                        target,
                        MaterialQuantity::Absorptivity,
                        cascades.absorptivity.as_slice(),
                        *a,
                    ));
                }
            }
            Action::SetThermalContact {
                component,
                contact_component,
                conductance,
            } => writes.push((
                ParameterTarget {
                    component: component.clone(),
                    counterpart: Some(contact_component.clone()),
                },
                MaterialQuantity::ContactConductance,
                cascades.contact_conductance.as_slice(),
                *conductance,
            )),
            _ => {}
        }

        let mut accepted = Vec::new();
        let mut written: Vec<(ParameterTarget, MaterialQuantity, String)> = Vec::new();
        for (target, quantity, names, value) in writes {
            let report = self.set_with_cascade(&target, names, value).await;
            match report.accepted {
                Some(name) => {
                    self.bind(&target, quantity, &name);
                    accepted.push(name.clone());
                    written.push((target, quantity, name));
                }
                None => {
                    obs::emit_cascade_exhausted(&target.component, &report.attempts);
                    for (t, q, name) in &written {
                        if let Some(previous) = q.value_in(current, t) {
                            if let Err(e) = self.write_parameter(t, name, previous).await {
                                warn!(
                                    component = %t.component,
                                    name = %name,
                                    error = %e,
                                    "parameter revert failed"
                                );
                            }
                        }
                    }
                    return Err(format!(
                        "no parameter name accepted (tried {})",
                        report
                            .attempts
                            .iter()
                            .map(|(n, _)| n.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                }
            }
        }
        Ok(accepted)
    }

    /// Apply every planned action to `working` and return the candidate.
    ///
    /// Updates `plan.counts.executed`, `plan.counts.effective`,
    /// `plan.state_changed`, and appends execution-stage drops to the plan.
    /// The candidate gets a fresh id and `working` as its parent.
    #[instrument(skip_all, fields(iteration = plan.iteration, actions = plan.actions.len()))]
    pub async fn execute(
        &self,
        working: &DesignState,
        plan: &mut ExecutionPlan,
    ) -> Result<ExecutionReport> {
        let mut current = working.clone();
        let mut fingerprint = StateFingerprint::of(&current)?;
        let mut outcomes = Vec::with_capacity(plan.actions.len());
        let mut drops = Vec::new();
        let mut wrote_parameters = false;

        for planned in &plan.actions {
            let action = &planned.action;
            let label = action.to_string();

            let applied: std::result::Result<(DesignState, Option<f64>, Vec<String>), String> =
                if action.is_reposition() {
                    self.apply_with_ladder(&current, action)
                        .map(|(next, scale)| (next, Some(scale), Vec::new()))
                        .ok_or_else(|| "every ladder scale was infeasible".to_string())
                } else if action.is_material_setting() {
                    wrote_parameters = true;
                    self.configure_material(&current, action)
                        .await
                        .map(|names| (self.layout.apply_action(&current, action), None, names))
                } else {
                    Ok((self.layout.apply_action(&current, action), None, Vec::new()))
                };

            match applied {
                Ok((next, scale, parameters)) => {
                    let next_fp = StateFingerprint::of(&next)?;
                    let effective = next_fp != fingerprint;
                    plan.counts.executed += 1;
                    if effective {
                        plan.counts.effective += 1;
                    }
                    current = next;
                    fingerprint = next_fp;
                    outcomes.push(ActionOutcome::Applied {
                        action: label,
                        scale,
                        parameters,
                        effective,
                    });
                }
                Err(reason) => {
                    warn!(action = %label, %reason, "action dropped during execution");
                    drops.push(DroppedAction {
                        stage: DropStage::Execution,
                        domain: planned.domain,
                        task_id: planned.task_id.clone(),
                        op: action.operator().to_string(),
                        reason: reason.clone(),
                    });
                    outcomes.push(ActionOutcome::Dropped {
                        action: label,
                        reason,
                    });
                }
            }
        }

        plan.dropped.extend(drops);
        plan.state_changed = fingerprint != StateFingerprint::of(working)?;

        let candidate = current.rebase(working, plan.iteration);
        Ok(ExecutionReport {
            candidate,
            outcomes,
            wrote_parameters,
        })
    }
}
