//! Tool invocation: declared capabilities become validated, auditable
//! executions.
//!
//! The registry is an owned value constructed once per session and passed
//! by injection — never a process-wide singleton. The whole core runs on a
//! single logical thread; a multi-threaded port must wrap the registry in a
//! mutex or instantiate one per session.

mod builtins;

pub use builtins::builtin_tools;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use orrery_core::{ExecutionResult, ParamSpec, SandboxConfig, Scene, ToolCategory, ToolsConfig};
use orrery_observe::Observer;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// The composite tool chaining `{tool, params}` steps.
pub const WORKFLOW_TOOL: &str = "execute_workflow";

/// Mutable state a tool executes against. The scene is a value owned by the
/// current turn — tools mutate this copy, never a caller's reference.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub scene: Scene,
}

impl ToolContext {
    pub fn new(scene: Scene) -> Self {
        Self { scene }
    }
}

pub type ToolExecutor =
    Box<dyn Fn(&Map<String, Value>, &mut ToolContext) -> Result<Value, String> + Send + Sync>;

/// A named, schema-described operation. Immutable once registered.
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSpec>,
    pub category: ToolCategory,
    pub executor: ToolExecutor,
}

/// One audit entry in the bounded execution log. The log exists for
/// debugging, not replay.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub tool: String,
    pub at: DateTime<Utc>,
    pub success: bool,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ToolRegistry {
    tools: IndexMap<String, ToolDefinition>,
    log: VecDeque<ExecutionRecord>,
    log_cap: usize,
    observer: Option<Arc<Observer>>,
}

impl ToolRegistry {
    pub fn new(cfg: &ToolsConfig) -> Self {
        Self {
            tools: IndexMap::new(),
            log: VecDeque::new(),
            log_cap: cfg.execution_log_cap,
            observer: None,
        }
    }

    /// A registry pre-populated with the built-in scene/physics/compute
    /// tools.
    pub fn with_builtins(tools_cfg: &ToolsConfig, sandbox_cfg: &SandboxConfig) -> Self {
        let mut registry = Self::new(tools_cfg);
        for def in builtin_tools(sandbox_cfg) {
            registry.register(def);
        }
        registry
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Register a tool. Idempotent by name: re-registering replaces the
    /// previous definition (last write wins) and logs a warning.
    pub fn register(&mut self, def: ToolDefinition) {
        let name = def.name.clone();
        if self.tools.insert(name.clone(), def).is_some() {
            let message = format!("tool '{name}' re-registered; previous definition replaced");
            match &self.observer {
                Some(observer) => observer.warn_log(&message),
                None => eprintln!("[orrery WARN] {message}"),
            }
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn definition(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Audit log entries, oldest first.
    pub fn execution_log(&self) -> impl ExactSizeIterator<Item = &ExecutionRecord> {
        self.log.iter()
    }

    /// Execute a named tool. Never returns an error and never panics
    /// through: unknown names, parameter violations, executor failures, and
    /// executor panics are all converted into failed results. Every call is
    /// stamped with its execution time and appended to the audit log.
    pub fn execute(&mut self, name: &str, params: Value, ctx: &mut ToolContext) -> ExecutionResult {
        let started = Instant::now();
        let mut result = self.execute_inner(name, params, ctx);
        result.metadata.execution_time_ms = started.elapsed().as_millis() as u64;
        self.push_record(ExecutionRecord {
            tool: name.to_string(),
            at: Utc::now(),
            success: result.success,
            execution_time_ms: result.metadata.execution_time_ms,
            error: result.error.clone(),
        });
        result
    }

    fn execute_inner(&mut self, name: &str, params: Value, ctx: &mut ToolContext) -> ExecutionResult {
        let params = match normalize_params(params) {
            Ok(map) => map,
            Err(message) => return ExecutionResult::fail(message),
        };

        let (filled, is_workflow) = {
            let Some(def) = self.tools.get(name) else {
                return ExecutionResult::fail(format!("unknown tool '{name}'"));
            };
            match validate_params(&def.parameters, params) {
                Ok(filled) => (filled, def.name == WORKFLOW_TOOL),
                Err(message) => return ExecutionResult::fail(message),
            }
        };

        // The composite workflow re-enters `execute` and so is dispatched
        // by the registry rather than through a stored executor.
        if is_workflow {
            return self.run_workflow(&filled, ctx);
        }

        let Some(def) = self.tools.get(name) else {
            return ExecutionResult::fail(format!("unknown tool '{name}'"));
        };
        match catch_unwind(AssertUnwindSafe(|| (def.executor)(&filled, ctx))) {
            Ok(Ok(data)) => ExecutionResult::ok(data),
            Ok(Err(message)) => ExecutionResult::fail(message),
            Err(_) => ExecutionResult::fail(format!("tool '{name}' panicked during execution")),
        }
    }

    /// Sequential, short-circuiting composition: each step's mutated scene
    /// threads into the next step's context; the first failing step stops
    /// the chain.
    fn run_workflow(&mut self, params: &Map<String, Value>, ctx: &mut ToolContext) -> ExecutionResult {
        let Some(steps) = params.get("steps").and_then(Value::as_array) else {
            return ExecutionResult::fail("'steps' must be an array of {tool, params} objects");
        };
        let mut step_results = Vec::new();
        for (i, step) in steps.iter().enumerate() {
            let Some(tool) = step.get("tool").and_then(Value::as_str) else {
                return ExecutionResult::fail(format!("workflow step {i} is missing 'tool'"));
            };
            let step_params = step.get("params").cloned().unwrap_or(Value::Null);
            let result = self.execute(tool, step_params, ctx);
            let failed = !result.success;
            let error = result.error.clone();
            step_results.push(json!({ "tool": tool, "result": result }));
            if failed {
                return ExecutionResult {
                    success: false,
                    data: Some(Value::Array(step_results)),
                    error: Some(format!(
                        "workflow stopped at step {i} ('{tool}'): {}",
                        error.unwrap_or_else(|| "failed".to_string())
                    )),
                    metadata: Default::default(),
                };
            }
        }
        ExecutionResult::ok(Value::Array(step_results))
    }

    fn push_record(&mut self, record: ExecutionRecord) {
        if self.log_cap == 0 {
            return;
        }
        while self.log.len() >= self.log_cap {
            self.log.pop_front();
        }
        self.log.push_back(record);
    }
}

fn normalize_params(params: Value) -> Result<Map<String, Value>, String> {
    match params {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(format!(
            "tool parameters must be a JSON object, got {}",
            value_kind(&other)
        )),
    }
}

/// Validate declared parameters and fill defaults for omitted optional
/// ones. The first violation short-circuits with a descriptive error.
fn validate_params(
    specs: &[ParamSpec],
    mut params: Map<String, Value>,
) -> Result<Map<String, Value>, String> {
    for spec in specs {
        match params.get(&spec.name) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(format!("missing required parameter '{}'", spec.name));
                }
                if let Some(default) = &spec.default {
                    params.insert(spec.name.clone(), default.clone());
                }
            }
            Some(value) => {
                if !spec.param_type.matches(value) {
                    return Err(format!(
                        "parameter '{}' must be {}, got {}",
                        spec.name,
                        spec.param_type.as_str(),
                        value_kind(value)
                    ));
                }
                if !spec.enum_values.is_empty() {
                    let allowed = value
                        .as_str()
                        .is_some_and(|s| spec.enum_values.iter().any(|v| v == s));
                    if !allowed {
                        return Err(format!(
                            "parameter '{}' must be one of [{}]",
                            spec.name,
                            spec.enum_values.join(", ")
                        ));
                    }
                }
            }
        }
    }
    Ok(params)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
