//! Protocol types and validators for agent ↔ orchestrator communication.
//!
//! The agent backend emits structured JSON as plain text: envelopes arrive
//! wrapped in markdown code fences, surrounded by commentary, or inline.
//! This module extracts, validates, and deserializes those envelopes.

use orrery_core::{Patch, Scene};
use serde::{Deserialize, Serialize};

// ── Agent reply envelope ────────────────────────────────────────────────

/// Top-level envelope emitted by the agent as plain text JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentReply {
    Chat(ChatReply),
    CreateScene(CreateSceneReply),
    PatchScene(PatchSceneReply),
    ToolCall(ToolCallReply),
}

impl AgentReply {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::CreateScene(_) => "create_scene",
            Self::PatchScene(_) => "patch_scene",
            Self::ToolCall(_) => "tool_call",
        }
    }
}

/// Plain conversational reply with no scene effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
}

/// The agent authored a complete replacement scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSceneReply {
    pub scene: Scene,
    #[serde(default)]
    pub message: String,
}

/// Ordered patch batch against the current scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSceneReply {
    pub patches: Vec<Patch>,
    #[serde(default)]
    pub message: String,
}

/// One tool invocation by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallReply {
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub message: String,
}

// ── JSON extraction from freeform text ──────────────────────────────────

/// Extract the first valid JSON object from freeform text.
///
/// The agent may wrap its JSON in markdown code fences, add commentary
/// before/after, or emit it inline. This function finds the first `{...}`
/// block that parses as valid JSON.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let cleaned = strip_code_fences(text);

    let bytes = cleaned.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = find_matching_brace(cleaned, i) {
                let candidate = &cleaned[i..=end];
                if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                    return Some(candidate);
                }
            }
        }
        i += 1;
    }
    None
}

/// Strip markdown code fences (```json ... ``` or ``` ... ```).
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

/// Find the index of the closing `}` that matches the `{` at `start`.
fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape_next {
            escape_next = false;
            continue;
        }
        if b == b'\\' && in_string {
            escape_next = true;
            continue;
        }
        if b == b'"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Reply parsing ───────────────────────────────────────────────────────

/// Parse and validate an agent reply from freeform text.
///
/// `known_tools` is the registry's current tool table; a `tool_call`
/// naming anything else is rejected before dispatch. Returns the parsed
/// reply and the raw JSON string that was extracted.
pub fn parse_agent_reply(
    text: &str,
    known_tools: &[&str],
) -> Result<(AgentReply, String), AgentParseError> {
    let json_str = extract_json_object(text).ok_or(AgentParseError::NoJsonFound)?;

    let raw: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| AgentParseError::InvalidJson(e.to_string()))?;

    let type_field = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or(AgentParseError::MissingTypeField)?;

    match type_field {
        "chat" | "create_scene" | "patch_scene" | "tool_call" => {}
        other => return Err(AgentParseError::UnknownType(other.to_string())),
    }

    let reply: AgentReply = serde_json::from_str(json_str)
        .map_err(|e| AgentParseError::SchemaViolation(e.to_string()))?;

    validate_agent_reply(&reply, known_tools)?;

    Ok((reply, json_str.to_string()))
}

/// Semantic validation beyond the JSON schema.
fn validate_agent_reply(reply: &AgentReply, known_tools: &[&str]) -> Result<(), AgentParseError> {
    match reply {
        AgentReply::Chat(c) => {
            if c.message.trim().is_empty() {
                return Err(AgentParseError::SchemaViolation(
                    "chat.message is empty".into(),
                ));
            }
        }
        AgentReply::CreateScene(c) => {
            if c.scene.id.is_empty() {
                return Err(AgentParseError::SchemaViolation(
                    "create_scene.scene.id is empty".into(),
                ));
            }
        }
        AgentReply::PatchScene(p) => {
            if p.patches.is_empty() {
                return Err(AgentParseError::SchemaViolation(
                    "patch_scene.patches is empty".into(),
                ));
            }
        }
        AgentReply::ToolCall(t) => {
            if t.tool.is_empty() {
                return Err(AgentParseError::SchemaViolation(
                    "tool_call.tool is empty".into(),
                ));
            }
            if !known_tools.contains(&t.tool.as_str()) {
                return Err(AgentParseError::UnknownTool(t.tool.clone()));
            }
        }
    }
    Ok(())
}

/// Errors from agent reply parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentParseError {
    /// No JSON object found in text.
    NoJsonFound,
    /// JSON found but invalid syntax.
    InvalidJson(String),
    /// Missing required "type" field.
    MissingTypeField,
    /// Unknown "type" value.
    UnknownType(String),
    /// JSON doesn't match the expected envelope schema.
    SchemaViolation(String),
    /// Tool name not in the registry.
    UnknownTool(String),
}

impl std::fmt::Display for AgentParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoJsonFound => write!(f, "no JSON object found in agent output"),
            Self::InvalidJson(e) => write!(f, "invalid JSON: {e}"),
            Self::MissingTypeField => write!(f, "missing 'type' field in agent JSON"),
            Self::UnknownType(t) => write!(f, "unknown agent reply type: {t}"),
            Self::SchemaViolation(e) => write!(f, "schema violation: {e}"),
            Self::UnknownTool(t) => write!(f, "unknown tool in tool_call: {t}"),
        }
    }
}

/// Build the retry prompt when agent output fails validation.
pub fn retry_prompt(error: &AgentParseError) -> String {
    format!(
        "Your previous response could not be parsed: {error}\n\n\
         You MUST respond with EXACTLY ONE valid JSON object matching one of these types:\n\
         - {{\"type\":\"chat\", \"message\":\"...\"}}\n\
         - {{\"type\":\"create_scene\", \"scene\":{{\"id\":\"...\", \"name\":\"...\", \"objects\":[...]}}, \"message\":\"...\"}}\n\
         - {{\"type\":\"patch_scene\", \"patches\":[{{\"op\":\"replace\", \"path\":\"/objects/0/mass\", \"value\":2}}], \"message\":\"...\"}}\n\
         - {{\"type\":\"tool_call\", \"tool\":\"...\", \"params\":{{...}}, \"message\":\"...\"}}\n\n\
         Emit the JSON object now with no other text."
    )
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TOOLS: &[&str] = &["create_object", "remove_object", "execute_code"];

    #[test]
    fn extract_json_from_clean_text() {
        let text = r#"{"type":"chat","message":"All set."}"#;
        let json = extract_json_object(text).unwrap();
        assert_eq!(json, text);
    }

    #[test]
    fn extract_json_from_markdown_fence() {
        let text = "Here is my response:\n```json\n{\"type\":\"chat\",\"message\":\"ok\"}\n```";
        let json = extract_json_object(text).unwrap();
        assert!(json.contains("\"type\":\"chat\""));
    }

    #[test]
    fn extract_json_with_surrounding_text() {
        let text = "I'll add a sphere.\n{\"type\":\"tool_call\",\"tool\":\"create_object\",\"params\":{\"mass\":2}}\nDone.";
        let json = extract_json_object(text).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(parsed["type"], "tool_call");
        assert_eq!(parsed["tool"], "create_object");
    }

    #[test]
    fn extract_json_handles_strings_with_braces() {
        let text = r#"{"type":"chat","message":"Use {braces} like {this}"}"#;
        let json = extract_json_object(text).unwrap();
        let parsed: AgentReply = serde_json::from_str(json).unwrap();
        if let AgentReply::Chat(c) = parsed {
            assert!(c.message.contains("{braces}"));
        } else {
            panic!("expected Chat");
        }
    }

    #[test]
    fn extract_json_returns_none_for_no_json() {
        assert!(extract_json_object("just plain text").is_none());
        assert!(extract_json_object("").is_none());
        assert!(extract_json_object("{unclosed").is_none());
    }

    #[test]
    fn parse_chat_valid() {
        let (reply, _raw) =
            parse_agent_reply(r#"{"type":"chat","message":"Hello!"}"#, TOOLS).unwrap();
        assert_eq!(reply.kind(), "chat");
    }

    #[test]
    fn parse_create_scene_valid() {
        let text = r#"
        {
            "type": "create_scene",
            "scene": {
                "id": "orbit-demo",
                "name": "Orbit demo",
                "objects": [
                    {"id": "star", "mass": 1000.0, "gravitationalMass": 5000.0},
                    {"id": "planet", "mass": 1.0, "position": [30.0, 0.0, 0.0]}
                ],
                "hasGround": false
            },
            "message": "A two-body orbit."
        }
        "#;
        let (reply, _raw) = parse_agent_reply(text, TOOLS).unwrap();
        if let AgentReply::CreateScene(c) = reply {
            assert_eq!(c.scene.id, "orbit-demo");
            assert_eq!(c.scene.objects.len(), 2);
            assert_eq!(c.scene.objects[0].gravitational_mass, Some(5000.0));
        } else {
            panic!("expected CreateScene");
        }
    }

    #[test]
    fn parse_patch_scene_valid() {
        let text = r#"{"type":"patch_scene","patches":[{"op":"replace","path":"/objects/0/mass","value":3}],"message":"Heavier."}"#;
        let (reply, _raw) = parse_agent_reply(text, TOOLS).unwrap();
        if let AgentReply::PatchScene(p) = reply {
            assert_eq!(p.patches.len(), 1);
            assert_eq!(p.patches[0].path, "/objects/0/mass");
        } else {
            panic!("expected PatchScene");
        }
    }

    #[test]
    fn parse_tool_call_valid() {
        let text = r#"{"type":"tool_call","tool":"execute_code","params":{"code":"1+1"}}"#;
        let (reply, _raw) = parse_agent_reply(text, TOOLS).unwrap();
        if let AgentReply::ToolCall(t) = reply {
            assert_eq!(t.tool, "execute_code");
            assert_eq!(t.params["code"], "1+1");
        } else {
            panic!("expected ToolCall");
        }
    }

    #[test]
    fn parse_rejects_unknown_type() {
        let err = parse_agent_reply(r#"{"type":"explode","data":"boom"}"#, TOOLS).unwrap_err();
        assert!(matches!(err, AgentParseError::UnknownType(_)));
    }

    #[test]
    fn parse_rejects_missing_type() {
        let err = parse_agent_reply(r#"{"tool":"create_object"}"#, TOOLS).unwrap_err();
        assert!(matches!(err, AgentParseError::MissingTypeField));
    }

    #[test]
    fn parse_rejects_unknown_tool() {
        let err = parse_agent_reply(
            r#"{"type":"tool_call","tool":"launch_missiles","params":{}}"#,
            TOOLS,
        )
        .unwrap_err();
        assert!(matches!(err, AgentParseError::UnknownTool(_)));
    }

    #[test]
    fn parse_rejects_empty_patch_list() {
        let err =
            parse_agent_reply(r#"{"type":"patch_scene","patches":[]}"#, TOOLS).unwrap_err();
        assert!(matches!(err, AgentParseError::SchemaViolation(_)));
    }

    #[test]
    fn parse_rejects_empty_chat_message() {
        let err = parse_agent_reply(r#"{"type":"chat","message":"  "}"#, TOOLS).unwrap_err();
        assert!(matches!(err, AgentParseError::SchemaViolation(_)));
    }

    #[test]
    fn parse_rejects_bad_patch_op() {
        let err = parse_agent_reply(
            r#"{"type":"patch_scene","patches":[{"op":"explode","path":"/x","value":1}]}"#,
            TOOLS,
        )
        .unwrap_err();
        assert!(matches!(err, AgentParseError::SchemaViolation(_)));
    }

    #[test]
    fn parse_from_chatty_agent_output() {
        let text = "Let me make that sphere heavier.\n\n```json\n{\"type\":\"patch_scene\",\"patches\":[{\"op\":\"replace\",\"path\":\"/objects/0/mass\",\"value\":10}],\"message\":\"Ten times the mass.\"}\n```\n\nThat should do it.";
        let (reply, _raw) = parse_agent_reply(text, TOOLS).unwrap();
        assert_eq!(reply.kind(), "patch_scene");
    }

    #[test]
    fn retry_prompt_contains_error_and_shapes() {
        let prompt = retry_prompt(&AgentParseError::NoJsonFound);
        assert!(prompt.contains("no JSON object found"));
        assert!(prompt.contains("create_scene"));
        assert!(prompt.contains("patch_scene"));
        assert!(prompt.contains("tool_call"));
    }
}
