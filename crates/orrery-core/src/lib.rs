use chrono::{DateTime, Utc};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

/// Color assigned to bodies that arrive without one.
pub const DEFAULT_BODY_COLOR: &str = "#cccccc";

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".orrery")
}

// ── Scene document ──────────────────────────────────────────────────────

/// Root document describing all physics bodies, global forces, and material
/// defaults for one simulation. Serialized field names are the wire/storage
/// contract shared with scene storage and the agent backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Insertion order is render/iteration order.
    #[serde(default)]
    pub objects: Vec<Body>,
    #[serde(default = "default_gravity")]
    pub gravity: DVec3,
    #[serde(default)]
    pub has_ground: bool,
    #[serde(default)]
    pub contact_material: ContactMaterial,
    #[serde(default)]
    pub gravitational_physics: GravitationalPhysics,
    #[serde(default = "default_simulation_scale")]
    pub simulation_scale: String,
    /// Derived tag ("extraterrestrial"), recomputed after every successful
    /// patch batch — never carried forward manually.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub scene_type: Option<String>,
    /// Open schema: fields this core does not know about survive round-trips.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Scene {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            objects: Vec::new(),
            gravity: default_gravity(),
            has_ground: true,
            contact_material: ContactMaterial::default(),
            gravitational_physics: GravitationalPhysics::default(),
            simulation_scale: default_simulation_scale(),
            scene_type: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Check document invariants: non-empty id, unique object ids, and a
    /// type-appropriate shape descriptor on every body. Returns all
    /// violations rather than stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.id.is_empty() {
            issues.push("scene id is empty".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for body in &self.objects {
            if body.id.is_empty() {
                issues.push("body id is empty".to_string());
            } else if !seen.insert(body.id.as_str()) {
                issues.push(format!("duplicate body id '{}'", body.id));
            }
            if let Err(missing) = body.shape_is_complete() {
                issues.push(format!(
                    "body '{}' ({}) is missing {missing}",
                    body.id,
                    body.body_type.as_str()
                ));
            }
        }
        issues
    }

    pub fn body_index(&self, id: &str) -> Option<usize> {
        self.objects.iter().position(|b| b.id == id)
    }
}

fn default_gravity() -> DVec3 {
    DVec3::new(0.0, -9.81, 0.0)
}

fn default_simulation_scale() -> String {
    "terrestrial".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMaterial {
    #[serde(default = "default_friction")]
    pub friction: f64,
    #[serde(default = "default_restitution")]
    pub restitution: f64,
}

impl Default for ContactMaterial {
    fn default() -> Self {
        Self {
            friction: default_friction(),
            restitution: default_restitution(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GravitationalPhysics {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_gravitational_constant")]
    pub gravitational_constant: f64,
    /// Lower bound on pair separation fed into the inverse-square divide.
    #[serde(default = "default_min_distance")]
    pub min_distance: f64,
    /// Additive term on squared distance preventing force blow-up at
    /// near-zero separation.
    #[serde(default = "default_softening")]
    pub softening: f64,
}

impl Default for GravitationalPhysics {
    fn default() -> Self {
        Self {
            enabled: false,
            gravitational_constant: default_gravitational_constant(),
            min_distance: default_min_distance(),
            softening: default_softening(),
        }
    }
}

fn default_gravitational_constant() -> f64 {
    6.674e-11
}
fn default_min_distance() -> f64 {
    0.5
}
fn default_softening() -> f64 {
    0.1
}
fn default_friction() -> f64 {
    0.4
}
fn default_restitution() -> f64 {
    0.3
}
fn default_mass() -> f64 {
    1.0
}
fn default_body_color() -> String {
    DEFAULT_BODY_COLOR.to_string()
}
fn fresh_body_id() -> String {
    Uuid::now_v7().to_string()
}
fn default_radius() -> Option<f64> {
    Some(0.5)
}

// ── Bodies ──────────────────────────────────────────────────────────────

/// Shape tags understood by the rigid-body backend. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BodyType {
    #[default]
    Sphere,
    Box,
    Cylinder,
    Plane,
    Cone,
    Capsule,
}

impl BodyType {
    pub const ALL: &'static [BodyType] = &[
        Self::Sphere,
        Self::Box,
        Self::Cylinder,
        Self::Plane,
        Self::Cone,
        Self::Capsule,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sphere => "Sphere",
            Self::Box => "Box",
            Self::Cylinder => "Cylinder",
            Self::Plane => "Plane",
            Self::Cone => "Cone",
            Self::Capsule => "Capsule",
        }
    }

    #[must_use]
    pub fn from_str_tag(s: &str) -> Option<Self> {
        Some(match s {
            "Sphere" => Self::Sphere,
            "Box" => Self::Box,
            "Cylinder" => Self::Cylinder,
            "Plane" => Self::Plane,
            "Cone" => Self::Cone,
            "Capsule" => Self::Capsule,
            _ => return None,
        })
    }
}

/// One physical object within a scene. Partially-specified documents parse:
/// every field except the shape descriptors has a serde default, so bodies
/// authored by the agent round-trip into a valid Body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[serde(default = "fresh_body_id")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub body_type: BodyType,
    #[serde(default = "default_mass")]
    pub mass: f64,
    #[serde(default)]
    pub position: DVec3,
    #[serde(default)]
    pub velocity: DVec3,
    #[serde(default)]
    pub rotation: DVec3,
    #[serde(default)]
    pub angular_velocity: DVec3,
    #[serde(default = "default_body_color")]
    pub color: String,
    #[serde(default = "default_restitution")]
    pub restitution: f64,
    #[serde(default = "default_friction")]
    pub friction: f64,
    #[serde(default)]
    pub is_static: bool,
    /// Integrator-only override of `mass`; ignored by the rigid-body backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gravitational_mass: Option<f64>,
    /// Defaults to the unit-ish sphere radius so a partially-specified body
    /// is a complete Sphere; other shapes must supply their descriptors.
    #[serde(default = "default_radius", skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for Body {
    fn default() -> Self {
        Self {
            id: fresh_body_id(),
            body_type: BodyType::Sphere,
            mass: default_mass(),
            position: DVec3::ZERO,
            velocity: DVec3::ZERO,
            rotation: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
            color: default_body_color(),
            restitution: default_restitution(),
            friction: default_friction(),
            is_static: false,
            gravitational_mass: None,
            radius: default_radius(),
            dimensions: None,
            height: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl Body {
    /// Mass used by the gravitational integrator.
    #[must_use]
    pub fn effective_gravitational_mass(&self) -> f64 {
        self.gravitational_mass.unwrap_or(self.mass)
    }

    /// Shape descriptor completeness for this body's type. `Err` names the
    /// missing field(s).
    pub fn shape_is_complete(&self) -> std::result::Result<(), String> {
        let missing = match self.body_type {
            BodyType::Sphere => self.radius.is_none().then_some("radius"),
            BodyType::Box => self.dimensions.is_none().then_some("dimensions"),
            BodyType::Cylinder | BodyType::Cone | BodyType::Capsule => {
                if self.radius.is_none() {
                    Some("radius")
                } else if self.height.is_none() {
                    Some("height")
                } else {
                    None
                }
            }
            BodyType::Plane => None,
        };
        match missing {
            Some(field) => Err(field.to_string()),
            None => Ok(()),
        }
    }
}

pub fn vec3_is_zero(v: DVec3) -> bool {
    v.length_squared() < 1e-12
}

// ── Patches ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl PatchOp {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
        }
    }
}

/// One JSON-pointer-addressed operation against a Scene document.
/// `/objects/-` appends; `/objects/0/mass` and `/objects[0]/mass` are both
/// accepted index syntaxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Patch {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }
}

// ── Execution results ───────────────────────────────────────────────────

/// Uniform result envelope returned by both the sandbox executor and the
/// tool registry, so the orchestrator never branches on executor identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: ExecMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecMetadata {
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Captured script output; attached even when execution failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console: Vec<String>,
}

impl ExecutionResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ExecMetadata::default(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: ExecMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.metadata.execution_time_ms = ms;
        self
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.metadata.warnings = warnings;
        self
    }

    #[must_use]
    pub fn with_console(mut self, console: Vec<String>) -> Self {
        self.metadata.console = console;
        self
    }
}

// ── Tool parameter schemas ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Vector3,
}

impl ParamType {
    /// Runtime type check against a JSON value. `serde_json::Value` variants
    /// distinguish arrays from objects directly, so no `typeof`-style
    /// reconciliation is needed here.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Vector3 => value
                .as_array()
                .is_some_and(|a| a.len() == 3 && a.iter().all(Value::is_number)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Vector3 => "vector3",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            enum_values: Vec::new(),
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type)
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|s| s.to_string()).collect();
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Scene,
    Physics,
    Compute,
}

// ── Events ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: DateTime<Utc>,
    pub session_id: Uuid,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    SceneLoadedV1 {
        scene_id: String,
        objects: usize,
    },
    PatchBatchAppliedV1 {
        scene_id: String,
        applied: usize,
        total: usize,
        errors: Vec<String>,
    },
    ToolExecutedV1 {
        tool: String,
        success: bool,
        execution_time_ms: u64,
    },
    SandboxRunV1 {
        success: bool,
        execution_time_ms: u64,
        timed_out: bool,
    },
    AgentReplyParsedV1 {
        kind: String,
    },
}

// ── Configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_timeout_ms")]
    pub timeout_ms: u64,
    /// Operation budget before the script is terminated regardless of time.
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
    #[serde(default = "default_console_cap")]
    pub console_cap: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_sandbox_timeout_ms(),
            max_operations: default_max_operations(),
            console_cap: default_console_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_execution_log_cap")]
    pub execution_log_cap: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            execution_log_cap: default_execution_log_cap(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_sandbox_timeout_ms() -> u64 {
    5000
}
fn default_max_operations() -> u64 {
    5_000_000
}
fn default_console_cap() -> usize {
    100
}
fn default_execution_log_cap() -> usize {
    100
}

impl AppConfig {
    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    /// Load configuration: defaults, overlaid with the project settings
    /// file, overlaid with the local (untracked) settings file.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        for path in [
            Self::project_settings_path(workspace),
            Self::project_local_settings_path(workspace),
        ] {
            if path.exists() {
                let raw = fs::read_to_string(&path)?;
                let overlay: Value = serde_json::from_str(&raw)?;
                merge_json_value(&mut merged, &overlay);
            }
        }
        Ok(serde_json::from_value(merged)?)
    }
}

/// Recursively merge `overlay` into `base`: objects merge key-wise, every
/// other value replaces.
pub fn merge_json_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_json_value(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value.clone(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
