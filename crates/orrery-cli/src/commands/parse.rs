use super::load_scene;
use anyhow::{Context, Result};
use orrery_agent::Orchestrator;
use orrery_core::AppConfig;
use orrery_observe::Observer;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

pub fn run(
    cfg: &AppConfig,
    observer: Arc<Observer>,
    scene_path: &Path,
    reply_path: &Path,
) -> Result<(String, bool)> {
    let scene = load_scene(scene_path)?;
    let reply = std::fs::read_to_string(reply_path)
        .with_context(|| format!("failed to read reply file {}", reply_path.display()))?;

    let mut orchestrator = Orchestrator::new(cfg).with_observer(observer);
    let outcome = orchestrator.handle_reply(&reply, &scene);

    let success =
        outcome.parse_error.is_none() && outcome.results.iter().all(|result| result.success);
    let report = json!({
        "kind": outcome.kind.as_str(),
        "message": outcome.message,
        "parseError": outcome.parse_error.as_ref().map(|e| e.to_string()),
        "results": outcome.results,
        "scene": outcome.scene,
    });
    Ok((serde_json::to_string_pretty(&report)?, success))
}
