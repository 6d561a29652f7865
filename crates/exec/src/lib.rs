//! C15 — skill/tool dispatcher: approval gating and per-tool performance
//! tracking around `cortex-tools`' registry. The dispatcher itself (timeout
//! + status + result shape) lives in `cortex_tools::ToolDispatcher`; this
//! crate is the policy layer ACT calls through before a dispatch happens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use cortex_tools::{ToolOutput, ToolRegistry};

// ── Execution Policy ─────────────────────────────────────────────────────────

/// Built from `SafetyConfig` in cortex-config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub approval_required: bool,
    pub allow_shell: bool,
    pub workspace_root: PathBuf,
    /// Explicit allow-list of tool names. Empty = all tools are eligible.
    pub tool_allowlist: Vec<String>,
    /// Explicit deny-list of tool names. Takes precedence over `tool_allowlist`.
    pub tool_denylist: Vec<String>,
    /// Tools that bypass interactive approval regardless of `approval_required`.
    pub approval_exempt_tools: Vec<String>,
    pub per_action_timeout: Duration,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            approval_required: true,
            allow_shell: false,
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            tool_allowlist: vec![],
            tool_denylist: vec![],
            approval_exempt_tools: vec![
                "calendar_add_event".to_string(),
                "remind_me".to_string(),
                "draft_email".to_string(),
                "web_search".to_string(),
            ],
            per_action_timeout: Duration::from_secs(10),
        }
    }
}

impl ExecutionPolicy {
    pub fn from_safety_config(safety: &cortex_config::SafetyConfig, workspace_root: PathBuf, per_action_timeout: Duration) -> Self {
        Self {
            approval_required: safety.approval_required,
            allow_shell: safety.allow_shell,
            workspace_root,
            per_action_timeout,
            ..Self::default()
        }
    }
}

// ── Approval Flow ────────────────────────────────────────────────────────────

/// A request sent to the user for approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub args: HashMap<String, String>,
    pub risk_summary: String,
}

/// The user's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// Channel-based approval gate.
pub type ApprovalSender = mpsc::Sender<(ApprovalRequest, oneshot::Sender<ApprovalDecision>)>;
pub type ApprovalReceiver = mpsc::Receiver<(ApprovalRequest, oneshot::Sender<ApprovalDecision>)>;

pub fn approval_channel() -> (ApprovalSender, ApprovalReceiver) {
    mpsc::channel(16)
}

// ── Per-tool performance tracking (spec §11 supplemented feature) ───────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPerfStats {
    pub invocations: u64,
    pub successes: u64,
    pub timeouts: u64,
    pub total_duration_ms: u64,
}

impl ToolPerfStats {
    pub fn mean_duration_ms(&self) -> f64 {
        if self.invocations == 0 { 0.0 } else { self.total_duration_ms as f64 / self.invocations as f64 }
    }

    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 { 0.0 } else { self.successes as f64 / self.invocations as f64 }
    }

    fn record(&mut self, success: bool, timed_out: bool, duration_ms: u64) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        }
        if timed_out {
            self.timeouts += 1;
        }
        self.total_duration_ms += duration_ms;
    }
}

#[derive(Default)]
pub struct ToolPerfTracker {
    by_tool: std::sync::Mutex<HashMap<String, ToolPerfStats>>,
}

impl ToolPerfTracker {
    pub fn record(&self, tool_name: &str, success: bool, timed_out: bool, duration_ms: u64) {
        let mut guard = self.by_tool.lock().expect("perf tracker mutex poisoned");
        guard.entry(tool_name.to_string()).or_default().record(success, timed_out, duration_ms);
    }

    pub fn stats_for(&self, tool_name: &str) -> ToolPerfStats {
        self.by_tool.lock().expect("perf tracker mutex poisoned").get(tool_name).cloned().unwrap_or_default()
    }
}

// ── Tool Executor ────────────────────────────────────────────────────────────

/// Orchestrates tool invocation with safety checks and approval flow.
pub struct ToolExecutor {
    policy: ExecutionPolicy,
    approval_tx: Option<ApprovalSender>,
    perf: ToolPerfTracker,
}

impl ToolExecutor {
    pub fn new(policy: ExecutionPolicy) -> Self {
        Self { policy, approval_tx: None, perf: ToolPerfTracker::default() }
    }

    pub fn with_approval(mut self, tx: ApprovalSender) -> Self {
        self.approval_tx = Some(tx);
        self
    }

    pub fn perf(&self) -> &ToolPerfTracker {
        &self.perf
    }

    /// Execute a tool by name from the registry, applying safety policy and
    /// the per-action timeout, and recording its performance.
    pub async fn execute(&self, registry: &ToolRegistry, tool_name: &str, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let tool = registry.get(tool_name).ok_or_else(|| anyhow::anyhow!("unknown tool: {tool_name}"))?;

        self.check_capability(tool_name)?;

        if self.requires_approval(tool_name) {
            let approved = self.request_approval(tool_name, args).await?;
            if !approved {
                info!(tool = tool_name, "tool execution denied by user");
                return Ok(ToolOutput { success: false, output: format!("execution of '{tool_name}' denied by user") });
            }
        }

        info!(tool = tool_name, "executing tool");
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.policy.per_action_timeout, tool.run(args)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(output)) => {
                self.perf.record(tool_name, output.success, false, elapsed_ms);
                Ok(output)
            }
            Ok(Err(err)) => {
                self.perf.record(tool_name, false, false, elapsed_ms);
                Err(err)
            }
            Err(_) => {
                self.perf.record(tool_name, false, true, elapsed_ms);
                bail!("tool '{tool_name}' timed out after {:?}", self.policy.per_action_timeout)
            }
        }
    }

    /// `true` when interactive approval is required for this tool, based on
    /// `approval_required` and the per-tool exemption list.
    fn requires_approval(&self, tool_name: &str) -> bool {
        if self.policy.approval_exempt_tools.contains(&tool_name.to_string()) {
            return false;
        }
        self.policy.approval_required
    }

    fn check_capability(&self, tool_name: &str) -> Result<()> {
        if tool_name == "run_shell" && !self.policy.allow_shell {
            bail!("shell execution is disabled by safety policy (set allow_shell = true)");
        }
        if self.policy.tool_denylist.contains(&tool_name.to_string()) {
            bail!("tool '{}' is blocked by policy (tool_denylist)", tool_name);
        }
        if !self.policy.tool_allowlist.is_empty() && !self.policy.tool_allowlist.contains(&tool_name.to_string()) {
            bail!("tool '{}' is not in the tool_allowlist", tool_name);
        }
        Ok(())
    }

    async fn request_approval(&self, tool_name: &str, args: &HashMap<String, String>) -> Result<bool> {
        if self.policy.approval_exempt_tools.contains(&tool_name.to_string()) {
            info!(tool = tool_name, "tool is approval-exempt; auto-approving");
            return Ok(true);
        }

        let Some(tx) = &self.approval_tx else {
            warn!(tool = tool_name, "approval required but no approval channel configured; denying");
            return Ok(false);
        };

        let risk = match tool_name {
            "run_shell" => format!("Execute shell command: {}", args.get("command").unwrap_or(&"(unknown)".to_string())),
            "write_file" => format!("Write to file: {}", args.get("path").unwrap_or(&"(unknown)".to_string())),
            "read_file" => format!("Read file: {}", args.get("path").unwrap_or(&"(unknown)".to_string())),
            _ => format!("Execute tool: {tool_name}"),
        };

        let request = ApprovalRequest { tool_name: tool_name.to_string(), args: args.clone(), risk_summary: risk };

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send((request, reply_tx)).await.map_err(|_| anyhow::anyhow!("approval channel closed"))?;
        let decision = reply_rx.await.map_err(|_| anyhow::anyhow!("approval response channel dropped"))?;
        Ok(decision == ApprovalDecision::Approve)
    }
}

// ── Workspace boundary helper ────────────────────────────────────────────────

pub fn ensure_within_workspace(workspace_root: &Path, target: &Path) -> Result<PathBuf> {
    let canonical_root = workspace_root.canonicalize()?;
    let joined = if target.is_absolute() { target.to_path_buf() } else { canonical_root.join(target) };
    let canonical_target = joined.canonicalize()?;

    if !canonical_target.starts_with(&canonical_root) {
        bail!("path escapes workspace boundary: {}", canonical_target.display());
    }

    Ok(canonical_target)
}

// ── Convenience: create a default registry with built-in tools ───────────────

pub fn default_registry(workspace_root: PathBuf, agent_data_dir: PathBuf, brave_api_key: Option<String>) -> ToolRegistry {
    use cortex_tools::builtins::{
        CalendarAddEventTool, DraftEmailTool, GitRollbackTool, ReadFileTool, RemindMeTool, RunShellTool, WebSearchTool, WriteFileTool,
    };

    let mut registry = ToolRegistry::default();
    registry.register(Box::new(ReadFileTool { workspace_root: workspace_root.clone() }));
    registry.register(Box::new(WriteFileTool { workspace_root: workspace_root.clone() }));
    registry.register(Box::new(RunShellTool { workspace_root: workspace_root.clone() }));
    registry.register(Box::new(CalendarAddEventTool { data_dir: agent_data_dir.clone() }));
    registry.register(Box::new(WebSearchTool { brave_api_key }));
    registry.register(Box::new(DraftEmailTool { data_dir: agent_data_dir.clone() }));
    registry.register(Box::new(RemindMeTool { data_dir: agent_data_dir }));
    registry.register(Box::new(GitRollbackTool { workspace_root }));
    registry
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use crate::{ExecutionPolicy, ToolExecutor, default_registry, ensure_within_workspace};

    #[test]
    fn workspace_guard_rejects_escape() -> anyhow::Result<()> {
        let base = std::env::temp_dir().join("cortex-exec-workspace-test");
        let child = base.join("safe");
        fs::create_dir_all(&child)?;

        let escaped = ensure_within_workspace(&base, &PathBuf::from("../"));
        assert!(escaped.is_err());
        Ok(())
    }

    #[test]
    fn workspace_guard_accepts_child_path() -> anyhow::Result<()> {
        let base = std::env::temp_dir().join("cortex-exec-ws-accept-test");
        let child = base.join("subdir");
        fs::create_dir_all(&child)?;
        let result = ensure_within_workspace(&base, &PathBuf::from("subdir"));
        assert!(result.is_ok());
        Ok(())
    }

    #[test]
    fn no_approval_required_when_disabled() {
        let policy = ExecutionPolicy { approval_required: false, approval_exempt_tools: vec![], ..ExecutionPolicy::default() };
        let executor = ToolExecutor::new(policy);
        assert!(!executor.requires_approval("write_file"));
        assert!(!executor.requires_approval("run_shell"));
    }

    #[test]
    fn approval_required_covers_all_tools_by_default() {
        let policy = ExecutionPolicy { approval_exempt_tools: vec![], ..ExecutionPolicy::default() };
        let executor = ToolExecutor::new(policy);
        assert!(executor.requires_approval("read_file"));
        assert!(executor.requires_approval("write_file"));
    }

    #[test]
    fn exempt_tools_bypass_approval() {
        let policy = ExecutionPolicy { approval_exempt_tools: vec!["run_shell".to_string()], ..ExecutionPolicy::default() };
        let executor = ToolExecutor::new(policy);
        assert!(!executor.requires_approval("run_shell"));
    }

    #[test]
    fn denylist_blocks_tool() {
        let policy = ExecutionPolicy { tool_denylist: vec!["write_file".to_string()], ..ExecutionPolicy::default() };
        let executor = ToolExecutor::new(policy);
        assert!(executor.check_capability("write_file").is_err());
    }

    #[test]
    fn allowlist_blocks_unlisted_tool() {
        let policy = ExecutionPolicy { tool_allowlist: vec!["read_file".to_string()], ..ExecutionPolicy::default() };
        let executor = ToolExecutor::new(policy);
        assert!(executor.check_capability("read_file").is_ok());
        assert!(executor.check_capability("write_file").is_err());
    }

    #[test]
    fn empty_allowlist_permits_all() {
        let policy = ExecutionPolicy { tool_allowlist: vec![], tool_denylist: vec![], ..ExecutionPolicy::default() };
        let executor = ToolExecutor::new(policy);
        assert!(executor.check_capability("read_file").is_ok());
        assert!(executor.check_capability("write_file").is_ok());
        assert!(executor.check_capability("run_shell").is_err());
    }

    #[test]
    fn denylist_overrides_allowlist() {
        let policy = ExecutionPolicy {
            tool_allowlist: vec!["write_file".to_string()],
            tool_denylist: vec!["write_file".to_string()],
            ..ExecutionPolicy::default()
        };
        let executor = ToolExecutor::new(policy);
        assert!(executor.check_capability("write_file").is_err());
    }

    #[tokio::test]
    async fn shell_blocked_when_capability_disabled() -> anyhow::Result<()> {
        let workspace = std::env::temp_dir().join("cortex-exec-shell-test");
        fs::create_dir_all(&workspace)?;

        let policy = ExecutionPolicy { allow_shell: false, approval_required: false, ..ExecutionPolicy::default() };

        let executor = ToolExecutor::new(policy);
        let registry = default_registry(workspace, std::env::temp_dir().join("cortex-exec-shell-data"), None);

        let mut args = std::collections::HashMap::new();
        args.insert("command".to_string(), "echo hi".to_string());

        let result = executor.execute(&registry, "run_shell", &args).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("disabled"));
        Ok(())
    }

    #[tokio::test]
    async fn read_file_within_workspace() -> anyhow::Result<()> {
        let workspace = std::env::temp_dir().join("cortex-exec-read-test");
        fs::create_dir_all(&workspace)?;
        fs::write(workspace.join("hello.txt"), "Hello, world!")?;

        let policy = ExecutionPolicy {
            allow_shell: true,
            approval_required: false,
            workspace_root: workspace.clone(),
            ..ExecutionPolicy::default()
        };

        let executor = ToolExecutor::new(policy);
        let registry = default_registry(workspace, std::env::temp_dir().join("cortex-exec-read-data"), None);

        let mut args = std::collections::HashMap::new();
        args.insert("path".to_string(), "hello.txt".to_string());

        let result = executor.execute(&registry, "read_file", &args).await?;
        assert!(result.success);
        assert_eq!(result.output, "Hello, world!");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_tool_returns_error() -> anyhow::Result<()> {
        let workspace = std::env::temp_dir().join("cortex-exec-unknown-test");
        fs::create_dir_all(&workspace)?;

        let policy = ExecutionPolicy { approval_required: false, ..ExecutionPolicy::default() };

        let executor = ToolExecutor::new(policy);
        let registry = default_registry(workspace, std::env::temp_dir().join("cortex-exec-unknown-data"), None);

        let result = executor.execute(&registry, "nonexistent_tool", &std::collections::HashMap::new()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unknown tool"));
        Ok(())
    }

    #[test]
    fn default_policy_shell_disabled() {
        let p = ExecutionPolicy::default();
        assert!(!p.allow_shell);
    }

    #[test]
    fn default_policy_has_exempt_tools() {
        let p = ExecutionPolicy::default();
        assert!(!p.approval_exempt_tools.is_empty());
    }
}
