//! Built-in tools: scene mutation through the patch engine, force queries
//! through the integrator, and code execution through the sandbox.

use crate::{ToolContext, ToolDefinition, WORKFLOW_TOOL};
use orrery_core::{Body, BodyType, ParamSpec, ParamType, Patch, SandboxConfig, ToolCategory};
use orrery_gravity::GravitationalIntegrator;
use orrery_patch::apply_patches;
use orrery_sandbox::{ExecOptions, ReturnType, SandboxContext, SandboxExecutor};
use serde_json::{json, Value};

pub fn builtin_tools(sandbox_cfg: &SandboxConfig) -> Vec<ToolDefinition> {
    vec![
        create_object(),
        remove_object(),
        modify_object(),
        query_scene(),
        compute_forces(),
        execute_code(sandbox_cfg.clone()),
        execute_workflow(),
    ]
}

fn create_object() -> ToolDefinition {
    let shape_tags: Vec<&str> = BodyType::ALL.iter().map(|t| t.as_str()).collect();
    ToolDefinition {
        name: "create_object".to_string(),
        description: "Add a body to the scene; omitted fields take defaults".to_string(),
        parameters: vec![
            ParamSpec::optional("id", ParamType::String),
            ParamSpec::optional("type", ParamType::String).with_enum(&shape_tags),
            ParamSpec::optional("mass", ParamType::Number),
            ParamSpec::optional("position", ParamType::Vector3),
            ParamSpec::optional("velocity", ParamType::Vector3),
            ParamSpec::optional("color", ParamType::String),
            ParamSpec::optional("radius", ParamType::Number),
            ParamSpec::optional("dimensions", ParamType::Vector3),
            ParamSpec::optional("height", ParamType::Number),
            ParamSpec::optional("isStatic", ParamType::Boolean),
        ],
        category: ToolCategory::Scene,
        executor: Box::new(|params, ctx| {
            let body: Body = serde_json::from_value(Value::Object(params.clone()))
                .map_err(|err| format!("invalid body parameters: {err}"))?;
            if ctx.scene.body_index(&body.id).is_some() {
                return Err(format!("an object with id '{}' already exists", body.id));
            }
            let value = serde_json::to_value(&body).map_err(|err| err.to_string())?;
            let outcome = apply_patches(&ctx.scene, &[Patch::add("/objects/-", value.clone())]);
            if !outcome.success {
                return Err(outcome.errors.join("; "));
            }
            ctx.scene = outcome.scene;
            Ok(value)
        }),
    }
}

fn remove_object() -> ToolDefinition {
    ToolDefinition {
        name: "remove_object".to_string(),
        description: "Remove a body from the scene by id".to_string(),
        parameters: vec![ParamSpec::required("id", ParamType::String)],
        category: ToolCategory::Scene,
        executor: Box::new(|params, ctx| {
            let id = params
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let Some(index) = ctx.scene.body_index(&id) else {
                return Err(format!("no object with id '{id}'"));
            };
            let outcome = apply_patches(&ctx.scene, &[Patch::remove(format!("/objects/{index}"))]);
            if !outcome.success {
                return Err(outcome.errors.join("; "));
            }
            ctx.scene = outcome.scene;
            Ok(json!({ "removed": id, "objects": ctx.scene.objects.len() }))
        }),
    }
}

fn modify_object() -> ToolDefinition {
    ToolDefinition {
        name: "modify_object".to_string(),
        description: "Replace fields on a body; each field change is one patch".to_string(),
        parameters: vec![
            ParamSpec::required("id", ParamType::String),
            ParamSpec::required("updates", ParamType::Object),
        ],
        category: ToolCategory::Scene,
        executor: Box::new(|params, ctx| {
            let id = params
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let Some(index) = ctx.scene.body_index(&id) else {
                return Err(format!("no object with id '{id}'"));
            };
            let Some(updates) = params.get("updates").and_then(Value::as_object) else {
                return Err("'updates' must be an object".to_string());
            };
            if updates.is_empty() {
                return Err("'updates' is empty".to_string());
            }
            let batch: Vec<Patch> = updates
                .iter()
                .map(|(field, value)| {
                    Patch::replace(format!("/objects/{index}/{field}"), value.clone())
                })
                .collect();
            let outcome = apply_patches(&ctx.scene, &batch);
            if !outcome.success {
                return Err(outcome.errors.join("; "));
            }
            ctx.scene = outcome.scene;
            Ok(json!({
                "id": id,
                "applied": outcome.applied,
                "total": outcome.total,
                "errors": outcome.errors,
            }))
        }),
    }
}

fn query_scene() -> ToolDefinition {
    ToolDefinition {
        name: "query_scene".to_string(),
        description: "Summarize the scene, or fetch one body by id".to_string(),
        parameters: vec![ParamSpec::optional("id", ParamType::String)],
        category: ToolCategory::Scene,
        executor: Box::new(|params, ctx| {
            if let Some(id) = params.get("id").and_then(Value::as_str) {
                let Some(index) = ctx.scene.body_index(id) else {
                    return Err(format!("no object with id '{id}'"));
                };
                return serde_json::to_value(&ctx.scene.objects[index])
                    .map_err(|err| err.to_string());
            }
            let ids: Vec<&str> = ctx.scene.objects.iter().map(|b| b.id.as_str()).collect();
            Ok(json!({
                "id": ctx.scene.id,
                "name": ctx.scene.name,
                "objects": ctx.scene.objects.len(),
                "ids": ids,
                "gravity": ctx.scene.gravity.to_array(),
                "hasGround": ctx.scene.has_ground,
                "type": ctx.scene.scene_type,
                "gravitationalPhysics": ctx.scene.gravitational_physics,
            }))
        }),
    }
}

fn compute_forces() -> ToolDefinition {
    ToolDefinition {
        name: "compute_forces".to_string(),
        description: "Pairwise gravitational forces for the current scene".to_string(),
        parameters: vec![ParamSpec::optional("gravitationalConstant", ParamType::Number)],
        category: ToolCategory::Physics,
        executor: Box::new(|params, ctx| {
            let mut scene = ctx.scene.clone();
            if let Some(g) = params.get("gravitationalConstant").and_then(Value::as_f64) {
                scene.gravitational_physics.gravitational_constant = g;
            }
            let integrator = GravitationalIntegrator::from_scene(&scene);
            let forces = integrator.compute_forces(&scene.objects);
            serde_json::to_value(forces).map_err(|err| err.to_string())
        }),
    }
}

fn execute_code(sandbox_cfg: SandboxConfig) -> ToolDefinition {
    let sandbox = SandboxExecutor::new(sandbox_cfg);
    ToolDefinition {
        name: "execute_code".to_string(),
        description: "Run generated code in the sandbox against a scene snapshot".to_string(),
        parameters: vec![
            ParamSpec::required("code", ParamType::String),
            ParamSpec::optional("returnType", ParamType::String)
                .with_enum(&["objects", "scene", "value"])
                .with_default(json!("value")),
            ParamSpec::optional("timeout", ParamType::Number),
            ParamSpec::optional("allowSceneModification", ParamType::Boolean)
                .with_default(json!(false)),
        ],
        category: ToolCategory::Compute,
        executor: Box::new(move |params, ctx| {
            let code = params
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let return_type = params
                .get("returnType")
                .and_then(Value::as_str)
                .and_then(ReturnType::from_tag)
                .unwrap_or_default();
            let opts = ExecOptions {
                timeout_ms: params
                    .get("timeout")
                    .and_then(Value::as_u64),
                return_type,
                allow_scene_modification: params
                    .get("allowSceneModification")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            };
            let snapshot = SandboxContext::with_scene(&ctx.scene);
            let result = sandbox.execute(code, &snapshot, &opts);
            if result.success {
                Ok(json!({
                    "result": result.data,
                    "console": result.metadata.console,
                    "warnings": result.metadata.warnings,
                }))
            } else {
                Err(result
                    .error
                    .unwrap_or_else(|| "sandbox execution failed".to_string()))
            }
        }),
    }
}

fn execute_workflow() -> ToolDefinition {
    ToolDefinition {
        name: WORKFLOW_TOOL.to_string(),
        description: "Chain {tool, params} steps, threading the mutated scene; stops at the first failing step"
            .to_string(),
        parameters: vec![ParamSpec::required("steps", ParamType::Array)],
        category: ToolCategory::Compute,
        // Dispatched by the registry itself; see ToolRegistry::execute.
        executor: Box::new(|_, _| Err("composite tool is dispatched by the registry".to_string())),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
