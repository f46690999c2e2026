//! The orchestrator: one agent turn in, one normalized outcome out.
//!
//! A free-form agent reply is parsed into one of {chat, create_scene,
//! patch_scene, tool_call} and dispatched to the patch engine or the tool
//! registry. Data flows one direction per turn: reply text → outcome. Each
//! turn clones the scene it mutates, so independent turns share no mutable
//! mid-flight state.

mod protocol;

pub use protocol::{
    extract_json_object, parse_agent_reply, retry_prompt, AgentParseError, AgentReply, ChatReply,
    CreateSceneReply, PatchSceneReply, ToolCallReply,
};

use chrono::Utc;
use orrery_core::{AppConfig, EventEnvelope, EventKind, ExecutionResult, Scene};
use orrery_observe::Observer;
use orrery_patch::{apply_patches, update_scene_type};
use orrery_tools::{ToolContext, ToolRegistry};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Chat,
    CreateScene,
    PatchScene,
    ToolCall,
}

impl OutcomeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::CreateScene => "create_scene",
            Self::PatchScene => "patch_scene",
            Self::ToolCall => "tool_call",
        }
    }
}

/// Normalized result of one agent turn.
#[derive(Debug)]
pub struct AgentOutcome {
    pub kind: OutcomeKind,
    /// User-facing reply text.
    pub message: String,
    /// The mutated (or newly created) scene, when the turn produced one.
    pub scene: Option<Scene>,
    /// Execution envelopes produced by dispatch, in call order.
    pub results: Vec<ExecutionResult>,
    /// Set when the reply failed to parse and the turn degraded to chat;
    /// feed it to [`retry_prompt`] to ask the agent to correct itself.
    pub parse_error: Option<AgentParseError>,
}

/// Session-owned orchestrator. Owns the tool registry (constructed once,
/// injected where needed) and an optional observer for the event log.
pub struct Orchestrator {
    registry: ToolRegistry,
    observer: Option<Arc<Observer>>,
    session_id: Uuid,
    seq_no: u64,
}

impl Orchestrator {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            registry: ToolRegistry::with_builtins(&cfg.tools, &cfg.sandbox),
            observer: None,
            session_id: Uuid::now_v7(),
            seq_no: 0,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<Observer>) -> Self {
        self.registry = self.registry.with_observer(observer.clone());
        self.observer = Some(observer);
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Register custom tools beyond the built-ins.
    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    /// Handle one agent reply against the current scene.
    ///
    /// Malformed replies degrade to a chat outcome carrying the raw text —
    /// no parse failure escapes as an error. The caller's scene is never
    /// mutated; a changed scene comes back in the outcome.
    pub fn handle_reply(&mut self, text: &str, scene: &Scene) -> AgentOutcome {
        let known: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let known_refs: Vec<&str> = known.iter().map(String::as_str).collect();

        match protocol::parse_agent_reply(text, &known_refs) {
            Ok((reply, _raw)) => {
                self.record(EventKind::AgentReplyParsedV1 {
                    kind: reply.kind().to_string(),
                });
                self.dispatch(reply, scene)
            }
            Err(error) => {
                self.record(EventKind::AgentReplyParsedV1 {
                    kind: "chat".to_string(),
                });
                AgentOutcome {
                    kind: OutcomeKind::Chat,
                    message: text.trim().to_string(),
                    scene: None,
                    results: Vec::new(),
                    parse_error: Some(error),
                }
            }
        }
    }

    fn dispatch(&mut self, reply: AgentReply, scene: &Scene) -> AgentOutcome {
        match reply {
            AgentReply::Chat(chat) => AgentOutcome {
                kind: OutcomeKind::Chat,
                message: chat.message,
                scene: None,
                results: Vec::new(),
                parse_error: None,
            },
            AgentReply::CreateScene(create) => self.handle_create_scene(create),
            AgentReply::PatchScene(patch) => self.handle_patch_scene(patch, scene),
            AgentReply::ToolCall(call) => self.handle_tool_call(call, scene),
        }
    }

    fn handle_create_scene(&mut self, create: CreateSceneReply) -> AgentOutcome {
        let mut new_scene = create.scene;
        let issues = new_scene.validate();
        if !issues.is_empty() {
            let error = format!("scene rejected: {}", issues.join("; "));
            return AgentOutcome {
                kind: OutcomeKind::CreateScene,
                message: error.clone(),
                scene: None,
                results: vec![ExecutionResult::fail(error)],
                parse_error: None,
            };
        }
        update_scene_type(&mut new_scene);
        self.record(EventKind::SceneLoadedV1 {
            scene_id: new_scene.id.clone(),
            objects: new_scene.objects.len(),
        });
        let message = if create.message.is_empty() {
            format!(
                "Created scene '{}' with {} object(s)",
                new_scene.name,
                new_scene.objects.len()
            )
        } else {
            create.message
        };
        AgentOutcome {
            kind: OutcomeKind::CreateScene,
            message,
            scene: Some(new_scene),
            results: Vec::new(),
            parse_error: None,
        }
    }

    fn handle_patch_scene(&mut self, patch: PatchSceneReply, scene: &Scene) -> AgentOutcome {
        let outcome = apply_patches(scene, &patch.patches);
        self.record(EventKind::PatchBatchAppliedV1 {
            scene_id: scene.id.clone(),
            applied: outcome.applied,
            total: outcome.total,
            errors: outcome.errors.clone(),
        });

        let result = ExecutionResult {
            success: outcome.success,
            data: Some(json!({ "applied": outcome.applied, "total": outcome.total })),
            error: (!outcome.errors.is_empty()).then(|| outcome.errors.join("; ")),
            metadata: Default::default(),
        };
        let message = if patch.message.is_empty() {
            format!("Applied {} of {} patch(es)", outcome.applied, outcome.total)
        } else {
            patch.message
        };
        AgentOutcome {
            kind: OutcomeKind::PatchScene,
            message,
            scene: outcome.success.then_some(outcome.scene),
            results: vec![result],
            parse_error: None,
        }
    }

    fn handle_tool_call(&mut self, call: ToolCallReply, scene: &Scene) -> AgentOutcome {
        let mut ctx = ToolContext::new(scene.clone());
        let result = self.registry.execute(&call.tool, call.params, &mut ctx);
        self.record(EventKind::ToolExecutedV1 {
            tool: call.tool.clone(),
            success: result.success,
            execution_time_ms: result.metadata.execution_time_ms,
        });

        let message = if !call.message.is_empty() {
            call.message
        } else if result.success {
            format!("Tool '{}' succeeded", call.tool)
        } else {
            format!(
                "Tool '{}' failed: {}",
                call.tool,
                result.error.as_deref().unwrap_or("unknown error")
            )
        };
        AgentOutcome {
            kind: OutcomeKind::ToolCall,
            message,
            scene: result.success.then_some(ctx.scene),
            results: vec![result],
            parse_error: None,
        }
    }

    fn record(&mut self, kind: EventKind) {
        if let Some(observer) = &self.observer {
            self.seq_no += 1;
            let event = EventEnvelope {
                seq_no: self.seq_no,
                at: Utc::now(),
                session_id: self.session_id,
                kind,
            };
            if let Err(err) = observer.record_event(&event) {
                observer.warn_log(&format!("failed to record event: {err}"));
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_testkit::{sample_scene, two_body_scene};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(&AppConfig::default())
    }

    #[test]
    fn chat_reply_passes_through() {
        let mut orch = orchestrator();
        let scene = sample_scene();
        let outcome =
            orch.handle_reply(r#"{"type":"chat","message":"Looking good!"}"#, &scene);
        assert_eq!(outcome.kind, OutcomeKind::Chat);
        assert_eq!(outcome.message, "Looking good!");
        assert!(outcome.scene.is_none());
        assert!(outcome.parse_error.is_none());
    }

    #[test]
    fn malformed_reply_degrades_to_chat() {
        let mut orch = orchestrator();
        let scene = sample_scene();
        let outcome = orch.handle_reply("The sky sure is blue today.", &scene);
        assert_eq!(outcome.kind, OutcomeKind::Chat);
        assert_eq!(outcome.message, "The sky sure is blue today.");
        assert_eq!(outcome.parse_error, Some(AgentParseError::NoJsonFound));
    }

    #[test]
    fn unknown_tool_degrades_with_typed_error() {
        let mut orch = orchestrator();
        let scene = sample_scene();
        let outcome = orch.handle_reply(
            r#"{"type":"tool_call","tool":"launch_missiles","params":{}}"#,
            &scene,
        );
        assert_eq!(outcome.kind, OutcomeKind::Chat);
        assert!(matches!(
            outcome.parse_error,
            Some(AgentParseError::UnknownTool(_))
        ));
        // The error feeds a retry prompt.
        let prompt = retry_prompt(outcome.parse_error.as_ref().unwrap());
        assert!(prompt.contains("launch_missiles"));
    }

    #[test]
    fn tool_call_mutates_a_clone_of_the_scene() {
        let mut orch = orchestrator();
        let scene = sample_scene();
        let outcome = orch.handle_reply(
            r#"{"type":"tool_call","tool":"create_object","params":{"id":"comet","mass":0.5}}"#,
            &scene,
        );
        assert_eq!(outcome.kind, OutcomeKind::ToolCall);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].success);
        let mutated = outcome.scene.unwrap();
        assert_eq!(mutated.objects.len(), scene.objects.len() + 1);
        // Caller's scene untouched.
        assert_eq!(scene.objects.len(), 3);
    }

    #[test]
    fn failed_tool_call_returns_no_scene() {
        let mut orch = orchestrator();
        let scene = sample_scene();
        let outcome = orch.handle_reply(
            r#"{"type":"tool_call","tool":"remove_object","params":{"id":"ghost"}}"#,
            &scene,
        );
        assert_eq!(outcome.kind, OutcomeKind::ToolCall);
        assert!(!outcome.results[0].success);
        assert!(outcome.scene.is_none());
        assert!(outcome.message.contains("failed"));
    }

    #[test]
    fn patch_scene_applies_and_reports() {
        let mut orch = orchestrator();
        let scene = sample_scene();
        let outcome = orch.handle_reply(
            r#"{"type":"patch_scene","patches":[{"op":"replace","path":"/objects/1/mass","value":6}]}"#,
            &scene,
        );
        assert_eq!(outcome.kind, OutcomeKind::PatchScene);
        assert!(outcome.results[0].success);
        assert_eq!(outcome.scene.unwrap().objects[1].mass, 6.0);
        assert!(outcome.message.contains("1 of 1"));
    }

    #[test]
    fn structurally_bad_patch_batch_keeps_original_scene() {
        let mut orch = orchestrator();
        let scene = sample_scene();
        let outcome = orch.handle_reply(
            r#"{"type":"patch_scene","patches":[{"op":"add","path":"/objects/-"}]}"#,
            &scene,
        );
        assert_eq!(outcome.kind, OutcomeKind::PatchScene);
        assert!(!outcome.results[0].success);
        assert!(outcome.scene.is_none());
    }

    #[test]
    fn create_scene_recomputes_derived_tag() {
        let mut orch = orchestrator();
        let current = sample_scene();
        let outcome = orch.handle_reply(
            r#"{"type":"create_scene","scene":{"id":"space","name":"Deep space","gravity":[0,0,0],"hasGround":false,"gravitationalPhysics":{"enabled":true},"objects":[{"id":"a"},{"id":"b"}]}}"#,
            &current,
        );
        assert_eq!(outcome.kind, OutcomeKind::CreateScene);
        let scene = outcome.scene.unwrap();
        assert_eq!(scene.scene_type.as_deref(), Some("extraterrestrial"));
        assert_eq!(scene.objects.len(), 2);
    }

    #[test]
    fn create_scene_rejects_duplicate_ids() {
        let mut orch = orchestrator();
        let current = sample_scene();
        let outcome = orch.handle_reply(
            r#"{"type":"create_scene","scene":{"id":"dup","name":"Dup","objects":[{"id":"a"},{"id":"a"}]}}"#,
            &current,
        );
        assert_eq!(outcome.kind, OutcomeKind::CreateScene);
        assert!(outcome.scene.is_none());
        assert!(!outcome.results[0].success);
        assert!(outcome.message.contains("duplicate"));
    }

    #[test]
    fn workflow_dispatch_through_reply() {
        let mut orch = orchestrator();
        let scene = two_body_scene();
        let outcome = orch.handle_reply(
            r#"{"type":"tool_call","tool":"execute_workflow","params":{"steps":[
                {"tool":"create_object","params":{"id":"c","mass":1.0}},
                {"tool":"query_scene","params":{}}
            ]}}"#,
            &scene,
        );
        assert_eq!(outcome.kind, OutcomeKind::ToolCall);
        assert!(outcome.results[0].success, "{:?}", outcome.results[0].error);
        assert_eq!(outcome.scene.unwrap().objects.len(), 3);
    }

    #[test]
    fn events_are_recorded_when_an_observer_is_attached() {
        let workspace = tempfile::tempdir().unwrap();
        let observer = Arc::new(
            Observer::new(workspace.path(), &Default::default()).expect("observer"),
        );
        let mut orch = orchestrator().with_observer(observer);
        let scene = sample_scene();
        let _ = orch.handle_reply(
            r#"{"type":"tool_call","tool":"query_scene","params":{}}"#,
            &scene,
        );
        let log = std::fs::read_to_string(
            orrery_core::runtime_dir(workspace.path()).join("observe.log"),
        )
        .expect("log");
        assert!(log.contains("AgentReplyParsedV1"));
        assert!(log.contains("ToolExecutedV1"));
    }
}
