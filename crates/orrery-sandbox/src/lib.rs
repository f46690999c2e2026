//! Sandboxed execution of agent-generated code.
//!
//! Code runs in a rhai engine built per call with a restricted surface:
//! arithmetic and math built-ins, a `Vec3` value type, a small physics
//! formula library, JSON helpers, captured `print`/`debug` output, and —
//! unless scene modification was requested — a deep-cloned read-only
//! snapshot of the current scene as the `scene` constant. Safety is
//! enforced by what is reachable, not by OS-level isolation: this is the
//! accepted threat model for trusted-ish agent output, not hostile code.
//!
//! The wall-clock timeout is checked cooperatively between script
//! operations. A native call that blocks cannot be interrupted; true
//! preemptive cancellation would require OS-level isolation (a subprocess
//! or killable worker).

use glam::DVec3;
use orrery_core::{Body, ExecutionResult, SandboxConfig, Scene};
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What the caller expects back from the executed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    /// Coerce into an array of Bodies, defaulting missing fields.
    Objects,
    /// Expect a full Scene; fall back to the snapshot when it is not one.
    Scene,
    /// Return the raw result untouched.
    #[default]
    Value,
}

impl ReturnType {
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "objects" => Self::Objects,
            "scene" => Self::Scene,
            "value" => Self::Value,
            _ => return None,
        })
    }
}

/// Per-call execution options. A `None` timeout uses the configured default.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub timeout_ms: Option<u64>,
    pub return_type: ReturnType,
    pub allow_scene_modification: bool,
}

/// What the executed code may see.
#[derive(Debug, Clone, Default)]
pub struct SandboxContext {
    pub scene: Option<Scene>,
}

impl SandboxContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_scene(scene: &Scene) -> Self {
        Self {
            scene: Some(scene.clone()),
        }
    }
}

pub struct SandboxExecutor {
    cfg: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(cfg: SandboxConfig) -> Self {
        Self { cfg }
    }

    /// Run `code` against the restricted environment and shape the result.
    /// Never returns an error: every failure mode (script error, timeout,
    /// unrepresentable result) is converted into a failed
    /// [`ExecutionResult`] with the captured console attached.
    pub fn execute(&self, code: &str, ctx: &SandboxContext, opts: &ExecOptions) -> ExecutionResult {
        let started = Instant::now();
        let timeout = Duration::from_millis(opts.timeout_ms.unwrap_or(self.cfg.timeout_ms));
        let console: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let mut engine = build_engine(&self.cfg, console.clone());
        engine.on_progress(move |_| {
            if started.elapsed() > timeout {
                Some(Dynamic::from("timeout"))
            } else {
                None
            }
        });

        let mut warnings = Vec::new();
        let mut scope = Scope::new();
        if !opts.allow_scene_modification {
            if let Some(scene) = &ctx.scene {
                match rhai::serde::to_dynamic(scene) {
                    Ok(snapshot) => {
                        scope.push_constant_dynamic("scene", snapshot);
                    }
                    Err(err) => warnings.push(format!("scene snapshot unavailable: {err}")),
                }
            }
        }

        let eval = engine.eval_with_scope::<Dynamic>(&mut scope, code);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let console_lines = console.lock().map(|lines| lines.clone()).unwrap_or_default();

        match eval {
            Err(err) => {
                let message = match *err {
                    EvalAltResult::ErrorTerminated(..) => {
                        format!("execution timed out after {}ms", timeout.as_millis())
                    }
                    EvalAltResult::ErrorTooManyOperations(..) => format!(
                        "operation budget exceeded ({} operations)",
                        self.cfg.max_operations
                    ),
                    other => format!("sandbox error: {other}"),
                };
                ExecutionResult::fail(message)
                    .with_execution_time(elapsed_ms)
                    .with_warnings(warnings)
                    .with_console(console_lines)
            }
            Ok(result) => match shape_result(result, opts.return_type, ctx, &mut warnings) {
                Ok(data) => ExecutionResult::ok(data)
                    .with_execution_time(elapsed_ms)
                    .with_warnings(warnings)
                    .with_console(console_lines),
                Err(message) => ExecutionResult::fail(message)
                    .with_execution_time(elapsed_ms)
                    .with_warnings(warnings)
                    .with_console(console_lines),
            },
        }
    }
}

// ── Engine construction ─────────────────────────────────────────────────

fn build_engine(cfg: &SandboxConfig, console: Arc<Mutex<Vec<String>>>) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(cfg.max_operations);
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(64);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(10_000);
    engine.set_max_string_size(100_000);
    engine.disable_symbol("eval");
    engine.disable_symbol("import");

    let cap = cfg.console_cap;
    let print_buffer = console.clone();
    engine.on_print(move |text| push_console(&print_buffer, cap, text.to_string()));
    let debug_buffer = console;
    engine.on_debug(move |text, _source, pos| {
        push_console(&debug_buffer, cap, format!("[debug {pos}] {text}"));
    });

    register_vec3(&mut engine);
    register_physics(&mut engine);
    register_json(&mut engine);
    engine
}

/// Buffered, capped console: script output never reaches the real stdout.
fn push_console(buffer: &Arc<Mutex<Vec<String>>>, cap: usize, line: String) {
    if let Ok(mut lines) = buffer.lock() {
        if lines.len() < cap {
            lines.push(line);
        } else if lines.len() == cap {
            lines.push("... console output truncated".to_string());
        }
    }
}

fn register_vec3(engine: &mut Engine) {
    engine
        .register_type_with_name::<DVec3>("Vec3")
        .register_fn("vec3", DVec3::new)
        .register_fn("vec3", |x: i64, y: i64, z: i64| {
            DVec3::new(x as f64, y as f64, z as f64)
        })
        .register_fn(
            "vec3",
            |components: rhai::Array| -> Result<DVec3, Box<EvalAltResult>> {
                if components.len() != 3 {
                    return Err("vec3 expects exactly 3 numbers".into());
                }
                let mut out = [0.0f64; 3];
                for (slot, item) in out.iter_mut().zip(components) {
                    *slot = item
                        .as_float()
                        .or_else(|_| item.as_int().map(|i| i as f64))
                        .map_err(|kind| -> Box<EvalAltResult> {
                            format!("vec3 component is {kind}, not a number").into()
                        })?;
                }
                Ok(DVec3::from_array(out))
            },
        )
        .register_fn("+", |a: DVec3, b: DVec3| a + b)
        .register_fn("-", |a: DVec3, b: DVec3| a - b)
        .register_fn("-", |a: DVec3| -a)
        .register_fn("*", |a: DVec3, s: f64| a * s)
        .register_fn("*", |s: f64, a: DVec3| a * s)
        .register_fn("*", |a: DVec3, s: i64| a * s as f64)
        .register_fn("*", |s: i64, a: DVec3| a * s as f64)
        .register_fn("/", |a: DVec3, s: f64| a / s)
        .register_fn("dot", |a: DVec3, b: DVec3| a.dot(b))
        .register_fn("cross", |a: DVec3, b: DVec3| a.cross(b))
        .register_fn("length", |v: DVec3| v.length())
        .register_fn("normalize", |v: DVec3| v.normalize_or_zero())
        .register_fn("to_string", |v: DVec3| {
            format!("vec3({}, {}, {})", v.x, v.y, v.z)
        })
        .register_get("x", |v: &mut DVec3| v.x)
        .register_get("y", |v: &mut DVec3| v.y)
        .register_get("z", |v: &mut DVec3| v.z);
}

fn register_physics(engine: &mut Engine) {
    engine
        .register_fn("gravity_force", |g: f64, m1: f64, m2: f64, r: f64| {
            if r > 0.0 {
                g * m1 * m2 / (r * r)
            } else {
                0.0
            }
        })
        .register_fn("spring_force", |k: f64, displacement: f64| -k * displacement)
        .register_fn("kinetic_energy", |m: f64, speed: f64| 0.5 * m * speed * speed)
        .register_fn("kinetic_energy", |m: f64, v: DVec3| {
            0.5 * m * v.length_squared()
        })
        .register_fn("potential_energy", |m: f64, g: f64, h: f64| m * g * h)
        .register_fn("momentum", |m: f64, speed: f64| m * speed)
        .register_fn("momentum", |m: f64, v: DVec3| v * m)
        .register_fn("distance", |a: DVec3, b: DVec3| a.distance(b));
}

fn register_json(engine: &mut Engine) {
    engine
        .register_fn(
            "parse_json",
            |text: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                let value: Value = serde_json::from_str(text)
                    .map_err(|err| -> Box<EvalAltResult> { format!("invalid JSON: {err}").into() })?;
                rhai::serde::to_dynamic(value)
            },
        )
        .register_fn(
            "to_json",
            |value: Dynamic| -> Result<String, Box<EvalAltResult>> {
                let json = dynamic_to_json(value)
                    .map_err(|err| -> Box<EvalAltResult> { err.into() })?;
                Ok(json.to_string())
            },
        );
}

// ── Result shaping ──────────────────────────────────────────────────────

fn shape_result(
    result: Dynamic,
    return_type: ReturnType,
    ctx: &SandboxContext,
    warnings: &mut Vec<String>,
) -> Result<Value, String> {
    let raw = dynamic_to_json(result)?;
    Ok(match return_type {
        ReturnType::Value => raw,
        ReturnType::Objects => coerce_objects(raw, warnings),
        ReturnType::Scene => coerce_scene(raw, ctx, warnings),
    })
}

/// Convert a script value to JSON, flattening `Vec3` into `[x, y, z]` and
/// recursing through arrays and maps so nested vectors survive.
fn dynamic_to_json(value: Dynamic) -> Result<Value, String> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Some(v) = value.clone().try_cast::<DVec3>() {
        return Ok(json!([v.x, v.y, v.z]));
    }
    if let Some(items) = value.clone().try_cast::<rhai::Array>() {
        return items
            .into_iter()
            .map(dynamic_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let mut out = serde_json::Map::new();
        for (key, item) in map {
            out.insert(key.to_string(), dynamic_to_json(item)?);
        }
        return Ok(Value::Object(out));
    }
    rhai::serde::from_dynamic::<Value>(&value)
        .map_err(|err| format!("result is not JSON-representable: {err}"))
}

/// Coerce a result into an array of Bodies, filling missing required fields
/// with defaults so a partially-specified generated object still
/// round-trips into a valid Body.
fn coerce_objects(raw: Value, warnings: &mut Vec<String>) -> Value {
    let items = match raw {
        Value::Array(items) => items,
        Value::Null => {
            warnings.push("code returned nothing; no objects produced".to_string());
            Vec::new()
        }
        other => vec![other],
    };
    let mut bodies: Vec<Body> = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        match fill_body_defaults(item) {
            Ok(body) => bodies.push(body),
            Err(message) => warnings.push(format!("object {i} dropped: {message}")),
        }
    }
    serde_json::to_value(bodies).unwrap_or_else(|_| Value::Array(Vec::new()))
}

/// A generated object becomes a Body through the document model's serde
/// defaults: anything missing gets a fresh id, Sphere shape, unit mass,
/// zero vectors, and the default color.
pub fn fill_body_defaults(value: Value) -> Result<Body, String> {
    if !value.is_object() {
        return Err("not an object".to_string());
    }
    serde_json::from_value(value).map_err(|err| err.to_string())
}

/// Expect a Scene-shaped result (id and name present); anything else falls
/// back to the read-only snapshot.
fn coerce_scene(raw: Value, ctx: &SandboxContext, warnings: &mut Vec<String>) -> Value {
    let scene_shaped = raw.as_object().is_some_and(|map| {
        map.get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty())
            && map.get("name").is_some()
    });
    if scene_shaped {
        match serde_json::from_value::<Scene>(raw) {
            Ok(scene) => {
                if let Ok(value) = serde_json::to_value(&scene) {
                    return value;
                }
            }
            Err(err) => warnings.push(format!("scene-shaped result failed to parse: {err}")),
        }
    } else {
        warnings.push("result is not scene-shaped; returning the scene snapshot".to_string());
    }
    ctx.scene
        .as_ref()
        .and_then(|scene| serde_json::to_value(scene).ok())
        .unwrap_or(Value::Null)
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_testkit::two_body_scene;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig::default())
    }

    #[test]
    fn evaluates_arithmetic() {
        let result = executor().execute("1 + 2", &SandboxContext::empty(), &ExecOptions::default());
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data, Some(json!(3)));
    }

    #[test]
    fn statement_only_code_returns_null() {
        let result =
            executor().execute("let x = 1;", &SandboxContext::empty(), &ExecOptions::default());
        assert!(result.success);
        assert_eq!(result.data, Some(Value::Null));
    }

    #[test]
    fn vec3_math_is_available() {
        let result = executor().execute(
            "let v = vec3(1.0, 2.0, 2.0); v.length()",
            &SandboxContext::empty(),
            &ExecOptions::default(),
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data, Some(json!(3.0)));
    }

    #[test]
    fn vec3_results_flatten_to_arrays() {
        let result = executor().execute(
            "vec3(1, 2, 3) * 2.0",
            &SandboxContext::empty(),
            &ExecOptions::default(),
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data, Some(json!([2.0, 4.0, 6.0])));
    }

    #[test]
    fn physics_helpers_are_available() {
        let result = executor().execute(
            "gravity_force(1.0, 2.0, 3.0, 2.0)",
            &SandboxContext::empty(),
            &ExecOptions::default(),
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data, Some(json!(1.5)));

        let result = executor().execute(
            "kinetic_energy(2.0, vec3(3.0, 0.0, 0.0))",
            &SandboxContext::empty(),
            &ExecOptions::default(),
        );
        assert_eq!(result.data, Some(json!(9.0)));
    }

    #[test]
    fn print_is_captured_not_printed() {
        let result = executor().execute(
            r#"print("hello"); 42"#,
            &SandboxContext::empty(),
            &ExecOptions::default(),
        );
        assert!(result.success);
        assert_eq!(result.data, Some(json!(42)));
        assert_eq!(result.metadata.console, vec!["hello".to_string()]);
    }

    #[test]
    fn console_is_capped() {
        let executor = SandboxExecutor::new(SandboxConfig {
            console_cap: 5,
            ..SandboxConfig::default()
        });
        let result = executor.execute(
            r#"for i in 0..20 { print(i); } "done""#,
            &SandboxContext::empty(),
            &ExecOptions::default(),
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.metadata.console.len(), 6);
        assert!(result.metadata.console[5].contains("truncated"));
    }

    #[test]
    fn timeout_fails_with_console_attached() {
        let executor = SandboxExecutor::new(SandboxConfig {
            max_operations: 0,
            ..SandboxConfig::default()
        });
        let result = executor.execute(
            r#"print("start"); while true {}"#,
            &SandboxContext::empty(),
            &ExecOptions {
                timeout_ms: Some(50),
                ..ExecOptions::default()
            },
        );
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("timed out"));
        assert_eq!(result.metadata.console, vec!["start".to_string()]);
    }

    #[test]
    fn operation_budget_is_enforced() {
        let executor = SandboxExecutor::new(SandboxConfig {
            max_operations: 1_000,
            ..SandboxConfig::default()
        });
        let result = executor.execute(
            "while true {}",
            &SandboxContext::empty(),
            &ExecOptions::default(),
        );
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap_or("")
            .contains("operation budget"));
    }

    #[test]
    fn script_errors_preserve_the_message() {
        let result = executor().execute(
            "no_such_function(1)",
            &SandboxContext::empty(),
            &ExecOptions::default(),
        );
        assert!(!result.success);
        let message = result.error.unwrap();
        assert!(message.starts_with("sandbox error:"));
        assert!(message.contains("no_such_function"));
    }

    #[test]
    fn scene_snapshot_is_readable() {
        let scene = two_body_scene();
        let result = executor().execute(
            "scene.objects.len()",
            &SandboxContext::with_scene(&scene),
            &ExecOptions::default(),
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data, Some(json!(2)));
    }

    #[test]
    fn scene_snapshot_rejects_assignment() {
        let scene = two_body_scene();
        let result = executor().execute(
            r#"scene.name = "hacked""#,
            &SandboxContext::with_scene(&scene),
            &ExecOptions::default(),
        );
        assert!(!result.success);
    }

    #[test]
    fn objects_return_type_fills_defaults() {
        let result = executor().execute(
            r#"[#{ mass: 2.0, position: [0.0, 5.0, 0.0] }]"#,
            &SandboxContext::empty(),
            &ExecOptions {
                return_type: ReturnType::Objects,
                ..ExecOptions::default()
            },
        );
        assert!(result.success, "{:?}", result.error);
        let data = result.data.unwrap();
        let bodies = data.as_array().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["mass"], json!(2.0));
        assert_eq!(bodies[0]["type"], json!("Sphere"));
        assert!(!bodies[0]["id"].as_str().unwrap().is_empty());
        assert_eq!(bodies[0]["color"], json!(orrery_core::DEFAULT_BODY_COLOR));
    }

    #[test]
    fn objects_return_type_wraps_single_object() {
        let result = executor().execute(
            r#"#{ mass: 1.5 }"#,
            &SandboxContext::empty(),
            &ExecOptions {
                return_type: ReturnType::Objects,
                ..ExecOptions::default()
            },
        );
        assert!(result.success);
        assert_eq!(result.data.unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn objects_return_type_drops_non_objects_with_warning() {
        let result = executor().execute(
            r#"[#{ mass: 1.0 }, 42]"#,
            &SandboxContext::empty(),
            &ExecOptions {
                return_type: ReturnType::Objects,
                ..ExecOptions::default()
            },
        );
        assert!(result.success);
        assert_eq!(result.data.unwrap().as_array().unwrap().len(), 1);
        assert_eq!(result.metadata.warnings.len(), 1);
    }

    #[test]
    fn scene_return_type_accepts_scene_shaped_results() {
        let scene = two_body_scene();
        let result = executor().execute(
            "scene",
            &SandboxContext::with_scene(&scene),
            &ExecOptions {
                return_type: ReturnType::Scene,
                ..ExecOptions::default()
            },
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data.unwrap()["id"], json!("two-body"));
        assert!(result.metadata.warnings.is_empty());
    }

    #[test]
    fn scene_return_type_falls_back_to_snapshot() {
        let scene = two_body_scene();
        let result = executor().execute(
            "42",
            &SandboxContext::with_scene(&scene),
            &ExecOptions {
                return_type: ReturnType::Scene,
                ..ExecOptions::default()
            },
        );
        assert!(result.success);
        assert_eq!(result.data.unwrap()["id"], json!("two-body"));
        assert_eq!(result.metadata.warnings.len(), 1);
    }

    #[test]
    fn json_helpers_round_trip() {
        let result = executor().execute(
            r#"let m = parse_json("{\"a\": 1}"); m.a"#,
            &SandboxContext::empty(),
            &ExecOptions::default(),
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data, Some(json!(1)));
    }

    #[test]
    fn return_type_tags_parse() {
        assert_eq!(ReturnType::from_tag("objects"), Some(ReturnType::Objects));
        assert_eq!(ReturnType::from_tag("scene"), Some(ReturnType::Scene));
        assert_eq!(ReturnType::from_tag("value"), Some(ReturnType::Value));
        assert_eq!(ReturnType::from_tag("frobnicate"), None);
    }
}
