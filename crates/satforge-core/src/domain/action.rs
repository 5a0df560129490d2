//! Typed layout actions.
//!
//! Proposals arrive as loosely structured JSON. [`Action::decode`] turns each
//! entry into a closed tagged union at the boundary and refuses unknown
//! operator tags instead of guessing.

use serde::{Deserialize, Serialize};

use satforge_state::{Axis, Vec3};

use crate::domain::error::ActionRejection;

/// Every operator tag the decoder accepts.
pub const KNOWN_OPERATORS: &[&str] = &[
    "MOVE",
    "SWAP",
    "ROTATE",
    "DEFORM",
    "ALIGN",
    "CHANGE_ENVELOPE",
    "ADD_BRACKET",
    "REPACK",
    "MODIFY_COATING",
    "ADD_HEATSINK",
    "SET_THERMAL_CONTACT",
    "ADJUST_LAYOUT",
    "CHANGE_ORIENTATION",
];

/// A single layout or material edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Translate a component by `delta`.
    Move { component: String, delta: Vec3 },
    /// Exchange the positions of two components.
    Swap { component: String, other: String },
    Rotate {
        component: String,
        axis: Axis,
        angle_deg: f64,
    },
    /// Grow or shrink one extent.
    Deform {
        component: String,
        axis: Axis,
        magnitude_mm: f64,
    },
    /// Snap a component's coordinate on `axis` to `reference`'s.
    Align {
        component: String,
        axis: Axis,
        reference: String,
    },
    ChangeEnvelope { outer_size: Vec3 },
    AddBracket { component: String, height_mm: f64 },
    /// Re-pack every component with at least `clearance_mm` between neighbours.
    Repack { clearance_mm: f64 },
    ModifyCoating {
        component: String,
        #[serde(default)]
        emissivity: Option<f64>,
        #[serde(default)]
        absorptivity: Option<f64>,
        #[serde(default)]
        coating: Option<String>,
    },
    AddHeatsink {
        component: String,
        face: String,
        thickness_mm: f64,
        conductivity: f64,
    },
    SetThermalContact {
        component: String,
        contact_component: String,
        conductance: f64,
    },
    /// Thermal-driven translation of a group. Cross-domain.
    AdjustLayout { components: Vec<String>, delta: Vec3 },
    /// Thermal-driven rotation. Cross-domain.
    ChangeOrientation {
        component: String,
        axis: Axis,
        angle_deg: f64,
    },
}

/// Discipline that owns an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorDomain {
    Geometric,
    Thermal,
}

/// What an action changes. Two actions on the same component conflict when
/// they share an effect class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectClass {
    Placement,
    Shape,
    Surface,
    Heatsink,
    Contact,
    Envelope,
}

impl Action {
    /// Decode one externally supplied action.
    pub fn decode(value: &serde_json::Value) -> Result<Action, ActionRejection> {
        let op = value
            .get("op")
            .and_then(|v| v.as_str())
            .ok_or(ActionRejection::MissingOperator)?;
        if !KNOWN_OPERATORS.contains(&op) {
            return Err(ActionRejection::UnknownOperator { op: op.to_string() });
        }
        serde_json::from_value(value.clone()).map_err(|e| ActionRejection::Malformed {
            op: op.to_string(),
            reason: e.to_string(),
        })
    }

    /// Operator tag as it appears on the wire.
    pub fn operator(&self) -> &'static str {
        match self {
            Action::Move { .. } => "MOVE",
            Action::Swap { .. } => "SWAP",
            Action::Rotate { .. } => "ROTATE",
            Action::Deform { .. } => "DEFORM",
            Action::Align { .. } => "ALIGN",
            Action::ChangeEnvelope { .. } => "CHANGE_ENVELOPE",
            Action::AddBracket { .. } => "ADD_BRACKET",
            Action::Repack { .. } => "REPACK",
            Action::ModifyCoating { .. } => "MODIFY_COATING",
            Action::AddHeatsink { .. } => "ADD_HEATSINK",
            Action::SetThermalContact { .. } => "SET_THERMAL_CONTACT",
            Action::AdjustLayout { .. } => "ADJUST_LAYOUT",
            Action::ChangeOrientation { .. } => "CHANGE_ORIENTATION",
        }
    }

    /// Components this action mutates.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Action::Move { component, .. }
            | Action::Rotate { component, .. }
            | Action::Deform { component, .. }
            | Action::Align { component, .. }
            | Action::AddBracket { component, .. }
            | Action::ModifyCoating { component, .. }
            | Action::AddHeatsink { component, .. }
            | Action::SetThermalContact { component, .. }
            | Action::ChangeOrientation { component, .. } => vec![component.as_str()],
            Action::Swap { component, other } => vec![component.as_str(), other.as_str()],
            Action::AdjustLayout { components, .. } => {
                components.iter().map(String::as_str).collect()
            }
            Action::ChangeEnvelope { .. } | Action::Repack { .. } => Vec::new(),
        }
    }

    /// Every component id the action names, mutated or read.
    pub fn referenced_components(&self) -> Vec<&str> {
        let mut ids = self.targets();
        match self {
            Action::Align { reference, .. } => ids.push(reference.as_str()),
            Action::SetThermalContact {
                contact_component, ..
            } => ids.push(contact_component.as_str()),
            _ => {}
        }
        ids
    }

    pub fn effect_class(&self) -> EffectClass {
        match self {
            Action::Move { .. }
            | Action::Swap { .. }
            | Action::Rotate { .. }
            | Action::Align { .. }
            | Action::Repack { .. }
            | Action::AdjustLayout { .. }
            | Action::ChangeOrientation { .. } => EffectClass::Placement,
            Action::Deform { .. } | Action::AddBracket { .. } => EffectClass::Shape,
            Action::ModifyCoating { .. } => EffectClass::Surface,
            Action::AddHeatsink { .. } => EffectClass::Heatsink,
            Action::SetThermalContact { .. } => EffectClass::Contact,
            Action::ChangeEnvelope { .. } => EffectClass::Envelope,
        }
    }

    /// Actions that touch the whole layout rather than named components.
    pub fn is_global(&self) -> bool {
        matches!(self, Action::Repack { .. } | Action::ChangeEnvelope { .. })
    }

    pub fn operator_domain(&self) -> OperatorDomain {
        match self {
            Action::Move { .. }
            | Action::Swap { .. }
            | Action::Rotate { .. }
            | Action::Deform { .. }
            | Action::Align { .. }
            | Action::ChangeEnvelope { .. }
            | Action::AddBracket { .. }
            | Action::Repack { .. } => OperatorDomain::Geometric,
            Action::ModifyCoating { .. }
            | Action::AddHeatsink { .. }
            | Action::SetThermalContact { .. }
            | Action::AdjustLayout { .. }
            | Action::ChangeOrientation { .. } => OperatorDomain::Thermal,
        }
    }

    /// Thermal operators that move geometry and need coordinator arbitration.
    pub fn is_cross_domain(&self) -> bool {
        matches!(
            self,
            Action::AdjustLayout { .. } | Action::ChangeOrientation { .. }
        )
    }

    /// Translations and rotations eligible for the magnitude ladder.
    pub fn is_reposition(&self) -> bool {
        matches!(self, Action::Move { .. } | Action::Rotate { .. })
    }

    /// Actions that must be pushed to the physics oracle's parameter surface.
    pub fn is_material_setting(&self) -> bool {
        matches!(
            self,
            Action::ModifyCoating { .. } | Action::SetThermalContact { .. }
        )
    }

    /// Copy with the displacement or angle scaled by `factor`.
    /// Non-reposition actions are returned unchanged.
    pub fn scaled(&self, factor: f64) -> Action {
        match self {
            Action::Move { component, delta } => Action::Move {
                component: component.clone(),
                delta: delta.scale(factor),
            },
            Action::Rotate {
                component,
                axis,
                angle_deg,
            } => Action::Rotate {
                component: component.clone(),
                axis: *axis,
                angle_deg: angle_deg * factor,
            },
            other => other.clone(),
        }
    }

    /// Lower a cross-domain action into primitive geometric actions.
    pub fn lower(&self) -> Vec<Action> {
        match self {
            Action::AdjustLayout { components, delta } => components
                .iter()
                .map(|c| Action::Move {
                    component: c.clone(),
                    delta: *delta,
                })
                .collect(),
            Action::ChangeOrientation {
                component,
                axis,
                angle_deg,
            } => vec![Action::Rotate {
                component: component.clone(),
                axis: *axis,
                angle_deg: *angle_deg,
            }],
            other => vec![other.clone()],
        }
    }

    /// Order in which action classes are applied within one plan.
    pub fn execution_rank(&self) -> u8 {
        match self {
            Action::ChangeEnvelope { .. } => 0,
            Action::Repack { .. } => 1,
            Action::Move { .. }
            | Action::Swap { .. }
            | Action::Rotate { .. }
            | Action::Align { .. }
            | Action::AdjustLayout { .. }
            | Action::ChangeOrientation { .. } => 2,
            Action::Deform { .. } | Action::AddBracket { .. } => 3,
            Action::AddHeatsink { .. } => 4,
            Action::ModifyCoating { .. } | Action::SetThermalContact { .. } => 5,
        }
    }

    /// Deterministic identity used for de-duplication and audit trails.
    pub fn signature(&self) -> String {
        format!("{self:?}")
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let targets = self.targets();
        if targets.is_empty() {
            write!(f, "{}", self.operator())
        } else {
            write!(f, "{}({})", self.operator(), targets.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_move() {
        let a = Action::decode(&json!({
            "op": "MOVE",
            "component": "battery",
            "delta": {"x": 5.0, "y": 0.0, "z": -2.0}
        }))
        .unwrap();
        assert_eq!(
            a,
            Action::Move {
                component: "battery".to_string(),
                delta: Vec3::new(5.0, 0.0, -2.0),
            }
        );
        assert_eq!(a.operator(), "MOVE");
    }

    #[test]
    fn test_decode_unknown_operator() {
        let err = Action::decode(&json!({"op": "TELEPORT", "component": "a"})).unwrap_err();
        assert_eq!(
            err,
            ActionRejection::UnknownOperator {
                op: "TELEPORT".to_string()
            }
        );
    }

    #[test]
    fn test_decode_missing_operator() {
        let err = Action::decode(&json!({"component": "a"})).unwrap_err();
        assert_eq!(err, ActionRejection::MissingOperator);
    }

    #[test]
    fn test_decode_malformed_fields() {
        let err = Action::decode(&json!({"op": "ROTATE", "component": "a"})).unwrap_err();
        assert!(matches!(err, ActionRejection::Malformed { ref op, .. } if op == "ROTATE"));
    }

    #[test]
    fn test_decode_coating_optional_fields() {
        let a = Action::decode(&json!({
            "op": "MODIFY_COATING",
            "component": "radiator",
            "emissivity": 0.9
        }))
        .unwrap();
        assert!(matches!(
            a,
            Action::ModifyCoating { emissivity: Some(e), absorptivity: None, coating: None, .. } if e == 0.9
        ));
    }

    #[test]
    fn test_every_known_operator_round_trips_its_tag() {
        let samples = vec![
            Action::Move { component: "a".into(), delta: Vec3::ZERO },
            Action::Swap { component: "a".into(), other: "b".into() },
            Action::Rotate { component: "a".into(), axis: Axis::Z, angle_deg: 90.0 },
            Action::Deform { component: "a".into(), axis: Axis::X, magnitude_mm: 1.0 },
            Action::Align { component: "a".into(), axis: Axis::Y, reference: "b".into() },
            Action::ChangeEnvelope { outer_size: Vec3::new(1.0, 1.0, 1.0) },
            Action::AddBracket { component: "a".into(), height_mm: 5.0 },
            Action::Repack { clearance_mm: 4.0 },
            Action::ModifyCoating { component: "a".into(), emissivity: Some(0.9), absorptivity: None, coating: None },
            Action::AddHeatsink { component: "a".into(), face: "+z".into(), thickness_mm: 3.0, conductivity: 200.0 },
            Action::SetThermalContact { component: "a".into(), contact_component: "b".into(), conductance: 500.0 },
            Action::AdjustLayout { components: vec!["a".into()], delta: Vec3::ZERO },
            Action::ChangeOrientation { component: "a".into(), axis: Axis::X, angle_deg: 90.0 },
        ];
        assert_eq!(samples.len(), KNOWN_OPERATORS.len());
        for action in samples {
            let value = serde_json::to_value(&action).unwrap();
            assert_eq!(value["op"], action.operator());
            assert_eq!(Action::decode(&value).unwrap(), action);
        }
    }

    #[test]
    fn test_scaled_touches_moves_and_rotations() {
        let mv = Action::Move { component: "a".into(), delta: Vec3::new(10.0, -4.0, 2.0) };
        assert_eq!(
            mv.scaled(0.5),
            Action::Move { component: "a".into(), delta: Vec3::new(5.0, -2.0, 1.0) }
        );
        let rot = Action::Rotate { component: "a".into(), axis: Axis::Z, angle_deg: 90.0 };
        assert_eq!(
            rot.scaled(0.25),
            Action::Rotate { component: "a".into(), axis: Axis::Z, angle_deg: 22.5 }
        );
        let bracket = Action::AddBracket { component: "a".into(), height_mm: 8.0 };
        assert_eq!(bracket.scaled(0.5), bracket);
    }

    #[test]
    fn test_lower_cross_domain() {
        let adjust = Action::AdjustLayout {
            components: vec!["a".into(), "b".into()],
            delta: Vec3::new(1.0, 0.0, 0.0),
        };
        let lowered = adjust.lower();
        assert_eq!(lowered.len(), 2);
        assert!(lowered.iter().all(Action::is_reposition));

        let orient = Action::ChangeOrientation { component: "a".into(), axis: Axis::Y, angle_deg: 90.0 };
        let lowered = orient.lower();
        assert_eq!(
            lowered,
            vec![Action::Rotate { component: "a".into(), axis: Axis::Y, angle_deg: 90.0 }]
        );
        assert!(lowered[0].is_reposition());
    }

    #[test]
    fn test_referenced_components_include_readers() {
        let align = Action::Align { component: "a".into(), axis: Axis::X, reference: "b".into() };
        assert_eq!(align.targets(), vec!["a"]);
        assert_eq!(align.referenced_components(), vec!["a", "b"]);
    }

    #[test]
    fn test_signature_is_stable() {
        let a = Action::Repack { clearance_mm: 4.0 };
        assert_eq!(a.signature(), a.clone().signature());
        assert_ne!(a.signature(), Action::Repack { clearance_mm: 5.0 }.signature());
    }
}
