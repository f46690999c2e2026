pub mod apply;
pub mod exec;
pub mod forces;
pub mod parse;
pub mod tool;

use anyhow::{Context, Result};
use orrery_core::Scene;
use std::path::Path;

pub(crate) fn load_scene(path: &Path) -> Result<Scene> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scene file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("scene file {} is not a valid scene", path.display()))
}
