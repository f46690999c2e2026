use super::load_scene;
use anyhow::Result;
use orrery_gravity::GravitationalIntegrator;
use std::path::Path;

pub fn run(scene_path: &Path) -> Result<(String, bool)> {
    let scene = load_scene(scene_path)?;
    let integrator = GravitationalIntegrator::from_scene(&scene);
    let forces = integrator.compute_forces(&scene.objects);
    Ok((serde_json::to_string_pretty(&forces)?, true))
}
