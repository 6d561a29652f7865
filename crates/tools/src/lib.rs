use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ── Tool trait and registry ──────────────────────────────────────────────────

/// Describes a single parameter that a tool accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// Static metadata about a tool, used by the LLM to decide which tool to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
}

/// The result returned after a tool runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

/// Trait implemented by every tool (built-in or WASM-loaded).
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput>;
}

/// Central registry for all available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }
}

// ── Built-in tools ───────────────────────────────────────────────────────────

pub mod builtins;
pub use builtins::{
    CalendarAddEventTool, DraftEmailTool, GitRollbackTool, ReadFileTool, RemindMeTool,
    RunShellTool, WebSearchTool, WriteFileTool,
};

// ── C15 dispatcher: unifies innate skills and external tools ────────────────

/// A manifest for a tool discovered through the external tool registry
/// (spec §4.5): `{name, manifest{description, parameters, trigger, auth,
/// config_schema}}`. Innate skills don't carry one of these — they're
/// registered programmatically via [`ToolRegistry::register`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalToolManifest {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub trigger_type: String,
    #[serde(default)]
    pub auth: HashMap<String, String>,
    #[serde(default)]
    pub config_schema: serde_json::Value,
}

/// The action the dispatcher is asked to run: an action type plus its
/// key/value arguments, as handed down from an ACT-loop plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_type: String,
    pub args: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Success,
    Error,
    Timeout,
}

/// `dispatch(topic, action) -> {action_type, status, result, execution_time}`
/// (spec §4.5). One action per call, gated by `per_action_timeout`; ACT
/// drives repeated calls to this across its iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub action_type: String,
    pub status: DispatchStatus,
    pub result: String,
    pub execution_time_ms: u64,
}

/// Central dispatcher combining the innate-skill [`ToolRegistry`] with a
/// discovered set of external tool manifests. External tools are resolved
/// by name to confirm they exist, but this crate doesn't own their
/// containerized execution transport — that's cortex-exec's job.
#[derive(Default)]
pub struct ToolDispatcher {
    pub innate: ToolRegistry,
    external: HashMap<String, ExternalToolManifest>,
}

impl ToolDispatcher {
    pub fn register_external(&mut self, manifest: ExternalToolManifest) {
        self.external.insert(manifest.name.clone(), manifest);
    }

    pub fn external_manifest(&self, name: &str) -> Option<&ExternalToolManifest> {
        self.external.get(name)
    }

    pub async fn dispatch(&self, _topic: &str, action: Action, per_action_timeout: std::time::Duration) -> DispatchResult {
        let started = std::time::Instant::now();
        let Some(tool) = self.innate.get(&action.action_type) else {
            return DispatchResult {
                action_type: action.action_type.clone(),
                status: DispatchStatus::Error,
                result: format!("unknown action_type: {}", action.action_type),
                execution_time_ms: started.elapsed().as_millis() as u64,
            };
        };

        match tokio::time::timeout(per_action_timeout, tool.run(&action.args)).await {
            Ok(Ok(output)) => DispatchResult {
                action_type: action.action_type,
                status: if output.success { DispatchStatus::Success } else { DispatchStatus::Error },
                result: output.output,
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
            Ok(Err(err)) => DispatchResult {
                action_type: action.action_type,
                status: DispatchStatus::Error,
                result: err.to_string(),
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
            Err(_) => DispatchResult {
                action_type: action.action_type,
                status: DispatchStatus::Timeout,
                result: "action timed out".to_string(),
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
        }
    }
}

#[cfg(test)]
mod dispatch_tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec { name: "echo".to_string(), description: "echoes input".to_string(), params: vec![] }
        }
        async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
            Ok(ToolOutput { success: true, output: args.get("text").cloned().unwrap_or_default() })
        }
    }

    #[tokio::test]
    async fn dispatch_runs_registered_innate_skill() {
        let mut dispatcher = ToolDispatcher::default();
        dispatcher.innate.register(Box::new(EchoTool));
        let mut args = HashMap::new();
        args.insert("text".to_string(), "hi".to_string());
        let result = dispatcher
            .dispatch("topic", Action { action_type: "echo".to_string(), args }, std::time::Duration::from_secs(1))
            .await;
        assert_eq!(result.status, DispatchStatus::Success);
        assert_eq!(result.result, "hi");
    }

    #[tokio::test]
    async fn dispatch_unknown_action_errors() {
        let dispatcher = ToolDispatcher::default();
        let result = dispatcher
            .dispatch("topic", Action { action_type: "nope".to_string(), args: HashMap::new() }, std::time::Duration::from_secs(1))
            .await;
        assert_eq!(result.status, DispatchStatus::Error);
    }

    #[test]
    fn external_manifest_round_trips() {
        let mut dispatcher = ToolDispatcher::default();
        dispatcher.register_external(ExternalToolManifest {
            name: "weather".to_string(),
            description: "gets weather".to_string(),
            parameters: serde_json::json!({"city": "string"}),
            trigger_type: "on_demand".to_string(),
            auth: HashMap::new(),
            config_schema: serde_json::json!({}),
        });
        assert!(dispatcher.external_manifest("weather").is_some());
        assert!(dispatcher.external_manifest("missing").is_none());
    }
}

// ── ToolRegistry tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod registry_tests {
    use super::*;
    use std::collections::HashMap;

    /// Minimal dummy tool for testing the registry.
    struct DummyTool {
        name: String,
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: format!("Dummy tool: {}", self.name),
                params: vec![ToolParam {
                    name: "input".to_string(),
                    description: "test param".to_string(),
                    required: true,
                }],
            }
        }
        async fn run(&self, _args: &HashMap<String, String>) -> Result<ToolOutput> {
            Ok(ToolOutput {
                success: true,
                output: format!("ran {}", self.name),
            })
        }
    }

    #[test]
    fn empty_registry() {
        let reg = ToolRegistry::default();
        assert!(reg.list_specs().is_empty());
        assert!(reg.get("anything").is_none());
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(DummyTool { name: "alpha".into() }));
        reg.register(Box::new(DummyTool { name: "beta".into() }));

        assert!(reg.get("alpha").is_some());
        assert!(reg.get("beta").is_some());
        assert!(reg.get("gamma").is_none());
    }

    #[test]
    fn list_specs_returns_all() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(DummyTool { name: "one".into() }));
        reg.register(Box::new(DummyTool { name: "two".into() }));
        reg.register(Box::new(DummyTool { name: "three".into() }));

        let specs = reg.list_specs();
        assert_eq!(specs.len(), 3);
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"one"));
        assert!(names.contains(&"two"));
        assert!(names.contains(&"three"));
    }

    #[test]
    fn get_returns_correct_tool_spec() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(DummyTool { name: "finder".into() }));

        let tool = reg.get("finder").unwrap();
        let spec = tool.spec();
        assert_eq!(spec.name, "finder");
        assert_eq!(spec.params.len(), 1);
        assert!(spec.params[0].required);
    }

    #[tokio::test]
    async fn run_registered_tool() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(DummyTool { name: "runner".into() }));

        let tool = reg.get("runner").unwrap();
        let result = tool.run(&HashMap::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "ran runner");
    }

    /// Duplicate registration: the first tool wins on `get` (Vec + find).
    /// This test documents the current behavior so someone adding a HashMap
    /// backend later doesn't silently change the semantics.
    #[test]
    fn duplicate_name_get_returns_first_registered() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(DummyTool { name: "dup".into() }));
        reg.register(Box::new(DummyTool { name: "dup".into() }));

        // list_specs should show both
        let specs = reg.list_specs();
        let dup_count = specs.iter().filter(|s| s.name == "dup").count();
        assert_eq!(dup_count, 2, "both duplicates should appear in list_specs");

        // get should return the first one (deterministic for Vec+find)
        assert!(reg.get("dup").is_some());
    }
}
