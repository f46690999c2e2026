use super::load_scene;
use anyhow::{bail, Context, Result};
use orrery_core::AppConfig;
use orrery_sandbox::{ExecOptions, ReturnType, SandboxContext, SandboxExecutor};
use std::path::Path;

pub fn run(
    cfg: &AppConfig,
    scene_path: &Path,
    code: Option<String>,
    file: Option<&Path>,
    return_type: &str,
    timeout_ms: Option<u64>,
) -> Result<(String, bool)> {
    let scene = load_scene(scene_path)?;
    let code = match (code, file) {
        (Some(code), _) => code,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read code file {}", path.display()))?,
        (None, None) => bail!("provide --code or --file"),
    };
    let Some(return_type) = ReturnType::from_tag(return_type) else {
        bail!("--return-type must be one of: objects, scene, value");
    };

    let executor = SandboxExecutor::new(cfg.sandbox.clone());
    let opts = ExecOptions {
        timeout_ms,
        return_type,
        allow_scene_modification: false,
    };
    let result = executor.execute(&code, &SandboxContext::with_scene(&scene), &opts);
    let success = result.success;
    Ok((serde_json::to_string_pretty(&result)?, success))
}
