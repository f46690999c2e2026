use super::load_scene;
use anyhow::{Context, Result};
use orrery_core::AppConfig;
use orrery_observe::Observer;
use orrery_tools::{ToolContext, ToolRegistry};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

pub fn run(
    cfg: &AppConfig,
    observer: Arc<Observer>,
    name: &str,
    scene_path: &Path,
    params: &str,
) -> Result<(String, bool)> {
    let scene = load_scene(scene_path)?;
    let params: Value =
        serde_json::from_str(params).context("--params must be a JSON object")?;

    let mut registry =
        ToolRegistry::with_builtins(&cfg.tools, &cfg.sandbox).with_observer(observer);
    let mut ctx = ToolContext::new(scene);
    let result = registry.execute(name, params, &mut ctx);
    let success = result.success;
    Ok((serde_json::to_string_pretty(&result)?, success))
}
