//! Scene mutation by ordered JSON patches.
//!
//! Application is two-phase. A structural gate first checks every patch in
//! the batch (op/path/value contract); any structural failure rejects the
//! whole batch with nothing applied. Structurally valid batches are then
//! applied one patch at a time against a deep clone of the scene: a patch
//! that fails semantically (value rejected by a field rule, unnavigable
//! path) is skipped and recorded, and the remaining patches still attempt
//! to apply. The caller's scene is never mutated in place.

mod path;
mod rules;

pub use path::{parse_path, PathToken};
pub use rules::{rule_for, FieldRule};

use orrery_core::{vec3_is_zero, Patch, PatchOp, Scene};
use serde_json::Value;

/// Contract violations that are fatal to an entire batch. The op itself is
/// typed, so "op not in {add, replace, remove}" is unrepresentable here and
/// is rejected where raw JSON is parsed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralPatchError {
    #[error("patch {index}: path is empty")]
    EmptyPath { index: usize },
    #[error("patch {index}: '{op}' requires a value")]
    MissingValue { index: usize, op: &'static str },
}

/// Result of applying one batch.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// True when at least one patch applied.
    pub success: bool,
    pub scene: Scene,
    pub applied: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

/// Structural gate for a single patch.
pub fn validate_patch(index: usize, patch: &Patch) -> Result<(), StructuralPatchError> {
    if patch.path.trim_matches('/').is_empty() {
        return Err(StructuralPatchError::EmptyPath { index });
    }
    if matches!(patch.op, PatchOp::Add | PatchOp::Replace) && patch.value.is_none() {
        return Err(StructuralPatchError::MissingValue {
            index,
            op: patch.op.as_str(),
        });
    }
    Ok(())
}

/// Validate and apply an ordered patch batch against `scene`.
///
/// Patches apply strictly in array order; later patches observe the effects
/// of earlier ones. After a successful batch the derived scene-type tag is
/// recomputed.
pub fn apply_patches(scene: &Scene, patches: &[Patch]) -> PatchOutcome {
    let total = patches.len();

    let structural: Vec<String> = patches
        .iter()
        .enumerate()
        .filter_map(|(i, p)| validate_patch(i, p).err())
        .map(|e| e.to_string())
        .collect();
    if !structural.is_empty() {
        return PatchOutcome {
            success: false,
            scene: scene.clone(),
            applied: 0,
            total,
            errors: structural,
        };
    }

    let mut doc = match serde_json::to_value(scene) {
        Ok(doc) => doc,
        Err(err) => {
            return PatchOutcome {
                success: false,
                scene: scene.clone(),
                applied: 0,
                total,
                errors: vec![format!("scene could not be serialized: {err}")],
            };
        }
    };

    let mut errors = Vec::new();
    let mut applied = 0;
    for (i, patch) in patches.iter().enumerate() {
        match apply_one(&mut doc, patch) {
            Ok(()) => applied += 1,
            Err(msg) => errors.push(format!(
                "patch {i} ({} {}): {msg}",
                patch.op.as_str(),
                patch.path
            )),
        }
    }

    let mut scene_out = match serde_json::from_value::<Scene>(doc) {
        Ok(s) => s,
        Err(err) => {
            // An unchecked patch broke the document shape; report failure
            // with the caller's scene intact.
            errors.push(format!(
                "patched document no longer matches the scene shape: {err}"
            ));
            return PatchOutcome {
                success: false,
                scene: scene.clone(),
                applied: 0,
                total,
                errors,
            };
        }
    };

    if applied > 0 {
        update_scene_type(&mut scene_out);
    }

    PatchOutcome {
        success: applied > 0,
        scene: scene_out,
        applied,
        total,
        errors,
    }
}

/// Recompute the derived scene-type tag from current state. Zero gravity
/// with no ground and gravitational physics enabled tags the scene
/// "extraterrestrial"; any other combination strips the tag. Idempotent.
pub fn update_scene_type(scene: &mut Scene) {
    let extraterrestrial = vec3_is_zero(scene.gravity)
        && !scene.has_ground
        && scene.gravitational_physics.enabled;
    scene.scene_type = extraterrestrial.then(|| "extraterrestrial".to_string());
}

fn apply_one(doc: &mut Value, patch: &Patch) -> Result<(), String> {
    let tokens = parse_path(&patch.path)?;
    let Some((last, parents)) = tokens.split_last() else {
        return Err("path is empty".to_string());
    };
    let creating = patch.op != PatchOp::Remove;

    let mut cur = doc;
    for token in parents {
        cur = navigate(cur, token, creating)?;
    }

    match patch.op {
        PatchOp::Add | PatchOp::Replace => {
            let value = patch
                .value
                .clone()
                .ok_or_else(|| "missing value".to_string())?;
            set_at(cur, last, value)
        }
        PatchOp::Remove => remove_at(cur, last),
    }
}

/// Placeholder used when an index write extends an array past its length.
/// An empty object deserializes into a fully-defaulted Body, so extension
/// under `/objects` yields valid placeholder bodies.
fn placeholder() -> Value {
    Value::Object(serde_json::Map::new())
}

fn navigate<'a>(
    cur: &'a mut Value,
    token: &PathToken,
    creating: bool,
) -> Result<&'a mut Value, String> {
    match token {
        PathToken::Field(name) => {
            if cur.is_null() && creating {
                *cur = Value::Object(serde_json::Map::new());
            }
            let obj = cur
                .as_object_mut()
                .ok_or_else(|| format!("cannot navigate '{name}' into a non-object"))?;
            if creating {
                Ok(obj.entry(name.clone()).or_insert(Value::Null))
            } else {
                obj.get_mut(name)
                    .ok_or_else(|| format!("path segment '{name}' not found"))
            }
        }
        PathToken::Index(i) => {
            if cur.is_null() && creating {
                *cur = Value::Array(Vec::new());
            }
            let arr = cur
                .as_array_mut()
                .ok_or_else(|| format!("cannot index [{i}] into a non-array"))?;
            if *i >= arr.len() {
                if creating {
                    // Patches can pre-allocate: extend rather than error.
                    arr.resize(*i + 1, placeholder());
                } else {
                    return Err(format!("index {i} out of bounds (len {})", arr.len()));
                }
            }
            Ok(&mut arr[*i])
        }
        PathToken::Append => Err("'-' must be the final path segment".to_string()),
    }
}

fn set_at(parent: &mut Value, last: &PathToken, value: Value) -> Result<(), String> {
    match last {
        PathToken::Field(name) => {
            let checked = rule_for(name).check(name, &value)?;
            if parent.is_null() {
                *parent = Value::Object(serde_json::Map::new());
            }
            let obj = parent
                .as_object_mut()
                .ok_or_else(|| format!("cannot set field '{name}' on a non-object"))?;
            obj.insert(name.clone(), checked);
            Ok(())
        }
        PathToken::Index(i) => {
            let arr = parent
                .as_array_mut()
                .ok_or_else(|| format!("cannot set index [{i}] on a non-array"))?;
            if *i >= arr.len() {
                arr.resize(*i + 1, placeholder());
            }
            arr[*i] = value;
            Ok(())
        }
        PathToken::Append => {
            let arr = parent
                .as_array_mut()
                .ok_or_else(|| "cannot append to a non-array".to_string())?;
            arr.push(value);
            Ok(())
        }
    }
}

fn remove_at(parent: &mut Value, last: &PathToken) -> Result<(), String> {
    match last {
        PathToken::Field(name) => {
            let obj = parent
                .as_object_mut()
                .ok_or_else(|| format!("cannot remove field '{name}' from a non-object"))?;
            obj.remove(name)
                .map(|_| ())
                .ok_or_else(|| format!("field '{name}' not found"))
        }
        PathToken::Index(i) => {
            let arr = parent
                .as_array_mut()
                .ok_or_else(|| format!("cannot remove index [{i}] from a non-array"))?;
            if *i < arr.len() {
                arr.remove(*i);
                Ok(())
            } else {
                Err(format!("index {i} out of bounds (len {})", arr.len()))
            }
        }
        PathToken::Append => Err("'-' is not a removable location".to_string()),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
