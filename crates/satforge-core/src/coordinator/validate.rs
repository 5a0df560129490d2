//! Per-action validation against the working state and declared bounds.

use satforge_state::{DesignState, Vec3};

use crate::config::ActionBounds;
use crate::domain::{Action, ActionRejection};

const FACES: &[&str] = &["+x", "-x", "+y", "-y", "+z", "-z"];

fn in_range(op: &str, field: &str, value: f64, min: f64, max: f64) -> Result<(), ActionRejection> {
    if value.is_finite() && value >= min && value <= max {
        return Ok(());
    }
    Err(ActionRejection::OutOfRange {
        op: op.to_string(),
        field: field.to_string(),
        value,
        min,
        max,
    })
}

fn translation(op: &str, delta: Vec3, bounds: &ActionBounds) -> Result<(), ActionRejection> {
    let magnitude = if delta.is_finite() { delta.norm() } else { f64::NAN };
    in_range(op, "delta", magnitude, 0.0, bounds.max_translation_mm)
}

fn invalid(op: &str, reason: impl Into<String>) -> ActionRejection {
    ActionRejection::InvalidParameter {
        op: op.to_string(),
        reason: reason.into(),
    }
}

/// Check that every referenced component exists and every numeric parameter
/// lies inside its declared domain.
pub fn validate_action(
    action: &Action,
    state: &DesignState,
    bounds: &ActionBounds,
) -> Result<(), ActionRejection> {
    let op = action.operator();

    for id in action.referenced_components() {
        if !state.has_component(id) {
            return Err(ActionRejection::UnknownComponent {
                op: op.to_string(),
                component: id.to_string(),
            });
        }
    }

    match action {
        Action::Move { delta, .. } => translation(op, *delta, bounds),
        Action::Swap { component, other } => {
            if component == other {
                return Err(invalid(op, "cannot swap a component with itself"));
            }
            Ok(())
        }
        Action::Rotate { angle_deg, .. } | Action::ChangeOrientation { angle_deg, .. } => in_range(
            op,
            "angle_deg",
            *angle_deg,
            -bounds.max_rotation_deg,
            bounds.max_rotation_deg,
        ),
        Action::Deform {
            component,
            axis,
            magnitude_mm,
        } => {
            in_range(
                op,
                "magnitude_mm",
                *magnitude_mm,
                -bounds.max_deform_mm,
                bounds.max_deform_mm,
            )?;
            let current = state
                .component(component)
                .map(|c| c.dimensions.get(*axis))
                .unwrap_or(0.0);
            if current + magnitude_mm <= 0.0 {
                return Err(invalid(op, "deformation would collapse the component"));
            }
            Ok(())
        }
        Action::Align {
            component,
            reference,
            ..
        } => {
            if component == reference {
                return Err(invalid(op, "cannot align a component to itself"));
            }
            Ok(())
        }
        Action::ChangeEnvelope { outer_size } => {
            for (field, v) in [("outer_size.x", outer_size.x), ("outer_size.y", outer_size.y), ("outer_size.z", outer_size.z)] {
                in_range(op, field, v, f64::MIN_POSITIVE, bounds.max_envelope_mm)?;
            }
            Ok(())
        }
        Action::AddBracket { height_mm, .. } => in_range(
            op,
            "height_mm",
            *height_mm,
            f64::MIN_POSITIVE,
            bounds.max_bracket_height_mm,
        ),
        Action::Repack { clearance_mm } => in_range(
            op,
            "clearance_mm",
            *clearance_mm,
            0.0,
            bounds.max_repack_clearance_mm,
        ),
        Action::ModifyCoating {
            emissivity,
            absorptivity,
            coating,
            ..
        } => {
            if emissivity.is_none() && absorptivity.is_none() && coating.is_none() {
                return Err(invalid(op, "nothing to change"));
            }
            if let Some(e) = emissivity {
                in_range(op, "emissivity", *e, 0.0, 1.0)?;
            }
            if let Some(a) = absorptivity {
                in_range(op, "absorptivity", *a, 0.0, 1.0)?;
            }
            Ok(())
        }
        Action::AddHeatsink {
            face,
            thickness_mm,
            conductivity,
            ..
        } => {
            if !FACES.contains(&face.as_str()) {
                return Err(invalid(op, format!("unknown face {face}")));
            }
            in_range(
                op,
                "thickness_mm",
                *thickness_mm,
                f64::MIN_POSITIVE,
                bounds.max_heatsink_thickness_mm,
            )?;
            in_range(
                op,
                "conductivity",
                *conductivity,
                f64::MIN_POSITIVE,
                bounds.max_conductivity,
            )
        }
        Action::SetThermalContact {
            component,
            contact_component,
            conductance,
        } => {
            if component == contact_component {
                return Err(invalid(op, "contact needs two distinct components"));
            }
            in_range(op, "conductance", *conductance, 0.0, bounds.max_conductance)
        }
        Action::AdjustLayout { components, delta } => {
            if components.is_empty() {
                return Err(invalid(op, "no components listed"));
            }
            let mut seen = std::collections::HashSet::new();
            if !components.iter().all(|c| seen.insert(c)) {
                return Err(invalid(op, "component listed twice"));
            }
            translation(op, *delta, bounds)
        }
    }
}
