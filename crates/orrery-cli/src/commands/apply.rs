use super::load_scene;
use anyhow::{Context, Result};
use orrery_core::Patch;
use orrery_patch::apply_patches;
use serde_json::json;
use std::path::Path;

pub fn run(scene_path: &Path, patches_path: &Path, out: Option<&Path>) -> Result<(String, bool)> {
    let scene = load_scene(scene_path)?;
    let raw = std::fs::read_to_string(patches_path)
        .with_context(|| format!("failed to read patch file {}", patches_path.display()))?;
    let patches: Vec<Patch> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON patch array", patches_path.display()))?;

    let outcome = apply_patches(&scene, &patches);
    if outcome.success {
        if let Some(out) = out {
            std::fs::write(out, serde_json::to_string_pretty(&outcome.scene)?)
                .with_context(|| format!("failed to write {}", out.display()))?;
        }
    }

    let report = json!({
        "success": outcome.success,
        "applied": outcome.applied,
        "total": outcome.total,
        "errors": outcome.errors,
        "sceneType": outcome.scene.scene_type,
    });
    Ok((serde_json::to_string_pretty(&report)?, outcome.success))
}
