//! Canonical JSON and state fingerprints.
//!
//! - `canonical_json`: sorted keys, integer-valued floats as integers, no NaN/Infinity
//! - `compute_digest`: SHA-256 hex of the canonical form
//! - `structural_fingerprint`: digest of every component's position,
//!   orientation, and dimensions, independent of component order
//! - `surface_fingerprint`: digest of envelope and per-component material and
//!   thermal attributes, independent of component order
//!
//! Coordinates are quantized to 1e-6 mm before hashing so that float noise
//! from a round trip through an external collaborator does not register as a
//! change.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use satforge_state::{Component, DesignState, Vec3};

use crate::domain::error::{Result, SatforgeError};

const QUANTUM: f64 = 1e6;

/// Recursively sort JSON object keys.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Normalize numbers: integer-valued floats become integers; NaN/Infinity are rejected.
fn normalize_value(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map.iter() {
                normalized.insert(k.clone(), normalize_value(v)?);
            }
            Ok(Value::Object(normalized))
        }
        Value::Array(arr) => Ok(Value::Array(
            arr.iter().map(normalize_value).collect::<Result<Vec<_>>>()?,
        )),
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => match n.as_f64() {
            Some(f) if !f.is_finite() => Err(SatforgeError::Invariant(
                "NaN/Infinity not permitted in canonical JSON".to_string(),
            )),
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Ok(Value::Number(serde_json::Number::from(f as i64)))
            }
            _ => Ok(Value::Number(n.clone())),
        },
        other => Ok(other.clone()),
    }
}

/// Convert a JSON value to canonical form: normalize numbers, sort keys, compact.
pub fn canonical_json(value: &Value) -> Result<String> {
    let normalized = normalize_value(value)?;
    Ok(serde_json::to_string(&sort_keys(&normalized))?)
}

/// SHA-256 hex digest of the canonical JSON form.
pub fn compute_digest(value: &Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn quantize(v: f64) -> i64 {
    (v * QUANTUM).round() as i64
}

fn quantize_vec(v: Vec3) -> Value {
    json!([quantize(v.x), quantize(v.y), quantize(v.z)])
}

fn sorted_components(state: &DesignState) -> Vec<&Component> {
    let mut components: Vec<&Component> = state.components.iter().collect();
    components.sort_by(|a, b| a.id.cmp(&b.id));
    components
}

/// Digest of component positions, orientations, and dimensions.
pub fn structural_fingerprint(state: &DesignState) -> Result<String> {
    let components: Vec<Value> = sorted_components(state)
        .into_iter()
        .map(|c| {
            json!({
                "id": c.id,
                "position": quantize_vec(c.position),
                "orientation": quantize_vec(c.orientation),
                "dimensions": quantize_vec(c.dimensions),
            })
        })
        .collect();
    compute_digest(&Value::Array(components))
}

/// Digest of envelope plus material, heat-sink, bracket, and contact attributes.
pub fn surface_fingerprint(state: &DesignState) -> Result<String> {
    let components: Vec<Value> = sorted_components(state)
        .into_iter()
        .map(|c| {
            let contacts: Vec<Value> = c
                .thermal_contacts
                .iter()
                .map(|(other, g)| json!([other, quantize(*g)]))
                .collect();
            json!({
                "id": c.id,
                "emissivity": quantize(c.emissivity),
                "absorptivity": quantize(c.absorptivity),
                "coating": c.coating,
                "heatsink": c.heatsink.as_ref().map(|h| json!([
                    h.face,
                    quantize(h.thickness_mm),
                    quantize(h.conductivity)
                ])),
                "bracket": c.bracket_height_mm.map(quantize),
                "contacts": contacts,
            })
        })
        .collect();
    compute_digest(&json!({
        "envelope": {
            "outer_size": quantize_vec(state.envelope.outer_size),
            "thickness": quantize(state.envelope.thickness),
        },
        "components": components,
    }))
}

/// Combined fingerprint pair for change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFingerprint {
    pub structural: String,
    pub surface: String,
}

impl StateFingerprint {
    pub fn of(state: &DesignState) -> Result<Self> {
        Ok(Self {
            structural: structural_fingerprint(state)?,
            surface: surface_fingerprint(state)?,
        })
    }
}
