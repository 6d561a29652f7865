//! C14 — the ACT loop: bounded iterative reasoning (plan → dispatch →
//! observe → replan) with a repetition guard, fatigue budgeting, and
//! forced termination (spec §4.7). Grounded in the teacher's structured
//! tool-calling loop (`tool_loop.rs`): build a prompt, call the LLM, run
//! whatever actions come back, feed results into the next prompt, repeat
//! until a termination condition fires.

use std::time::{Duration, Instant};

use cortex_config::ActConfig;
use cortex_llm::{LlmFormat, LlmProvider};
use cortex_router::{Mode, ModeRouter, RouterDecision, SignalVector};
use cortex_tools::{Action, DispatchResult, DispatchStatus, ToolDispatcher};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One `{type, args}` action as parsed from the LLM's `actions` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub args: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PlannedActions {
    #[serde(default)]
    actions: Vec<PlannedAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActIterationRecord {
    pub iteration_number: u32,
    pub actions: Vec<PlannedAction>,
    pub results: Vec<DispatchResult>,
    pub fatigue_after: f32,
    pub termination_reason: Option<TerminationReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    NoActions,
    RepetitionDetected,
    MaxIterations,
    FatigueBudget,
    CumulativeTimeout,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActHistory {
    pub iterations: Vec<ActIterationRecord>,
}

impl ActHistory {
    /// Rendered as tool-result context for the terminal-mode prompt (spec
    /// §4.7 step 3: "passing act_history as tool-result context").
    pub fn as_context_string(&self) -> String {
        self.iterations
            .iter()
            .flat_map(|it| it.results.iter().zip(it.actions.iter()))
            .map(|(result, action)| format!("{}: {} -> {}", action.action_type, result.status_label(), result.result))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `true` if any action across the run produced a visual "card" result
    /// (spec §4.10: a tool-worker follow-up message is suppressed when one
    /// did).
    pub fn emitted_card(&self) -> bool {
        self.iterations.iter().flat_map(|it| it.results.iter()).any(|r| r.result.contains("\"card\""))
    }
}

trait DispatchResultExt {
    fn status_label(&self) -> &'static str;
}

impl DispatchResultExt for DispatchResult {
    fn status_label(&self) -> &'static str {
        match self.status {
            DispatchStatus::Success => "success",
            DispatchStatus::Error => "error",
            DispatchStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActLoopOutcome {
    pub act_history: ActHistory,
    pub termination_reason: TerminationReason,
}

/// Cost-of-action function (spec §4.7.f): every dispatched action costs a
/// flat fatigue unit, doubled on timeout (a stalled action is more costly
/// to the loop's remaining budget than one that simply failed).
fn action_fatigue_cost(result: &DispatchResult) -> f32 {
    match result.status {
        DispatchStatus::Timeout => 0.3,
        DispatchStatus::Error => 0.15,
        DispatchStatus::Success => 0.15,
    }
}

pub struct ActPromptInputs<'a> {
    pub topic: &'a str,
    pub available_skills: &'a [String],
    pub available_tools: &'a [String],
    pub act_history: &'a ActHistory,
    pub user_message: &'a str,
}

/// ACT's system prompt skips the "identity" component to keep reasoning
/// pure (spec §4.7): just the soul/values contract plus the ACT-mode
/// contract describing the available actions and history so far.
pub fn build_act_system_prompt(inputs: &ActPromptInputs<'_>) -> String {
    format!(
        "You are operating in ACT mode: decide which actions to take to satisfy the user's request.\n\
         Respond with JSON: {{\"actions\": [{{\"type\": <action_type>, \"args\": {{...}}}}]}}.\n\
         Return an empty actions array when no further action is needed.\n\n\
         Topic: {topic}\n\
         Available skills: {skills}\n\
         Available tools: {tools}\n\
         Actions taken so far:\n{history}",
        topic = inputs.topic,
        skills = inputs.available_skills.join(", "),
        tools = inputs.available_tools.join(", "),
        history = if inputs.act_history.iterations.is_empty() { "(none yet)".to_string() } else { inputs.act_history.as_context_string() },
    )
}

fn parse_actions(raw: &str) -> Vec<PlannedAction> {
    serde_json::from_str::<PlannedActions>(raw).map(|p| p.actions).unwrap_or_default()
}

/// Runs the bounded ACT loop described in spec §4.7, used both by the
/// inline (slow) path and by the tool worker (C20) off the request path.
pub async fn run_act_loop(
    llm: &dyn LlmProvider,
    dispatcher: &ToolDispatcher,
    config: &ActConfig,
    prompt_inputs: ActPromptInputs<'_>,
    mut is_cancelled: impl FnMut() -> bool,
) -> ActLoopOutcome {
    let mut history = ActHistory::default();
    let mut fatigue: f32 = 0.0;
    let mut repetition_run: u32 = 0;
    let mut previous_action_type: Option<String> = None;
    let started = Instant::now();
    let per_action_timeout = Duration::from_secs(config.per_action_timeout_secs);
    let cumulative_timeout = Duration::from_secs(config.cumulative_timeout_secs);

    let mut iteration_number: u32 = 0;
    loop {
        if is_cancelled() {
            return ActLoopOutcome { act_history: history, termination_reason: TerminationReason::Cancelled };
        }

        let system_prompt = build_act_system_prompt(&ActPromptInputs {
            topic: prompt_inputs.topic,
            available_skills: prompt_inputs.available_skills,
            available_tools: prompt_inputs.available_tools,
            act_history: &history,
            user_message: prompt_inputs.user_message,
        });

        let response = match llm.send_message(&system_prompt, prompt_inputs.user_message, LlmFormat::Json).await {
            Ok(response) => response,
            Err(err) => {
                warn!(?err, iteration_number, "ACT loop: LLM call failed, terminating");
                return ActLoopOutcome { act_history: history, termination_reason: TerminationReason::NoActions };
            }
        };

        let actions = parse_actions(&response.text);
        if actions.is_empty() {
            return ActLoopOutcome { act_history: history, termination_reason: TerminationReason::NoActions };
        }

        // Repetition guard: compares this iteration's single action type
        // against the previous iteration's (spec only defines this for the
        // single-action case; multi-action iterations reset the run).
        if actions.len() == 1 {
            if previous_action_type.as_deref() == Some(actions[0].action_type.as_str()) {
                repetition_run += 1;
            } else {
                repetition_run = 0;
            }
            previous_action_type = Some(actions[0].action_type.clone());
        } else {
            repetition_run = 0;
            previous_action_type = None;
        }

        if repetition_run >= config.repetition_limit {
            return ActLoopOutcome { act_history: history, termination_reason: TerminationReason::RepetitionDetected };
        }

        let elapsed = started.elapsed();
        if iteration_number >= config.max_iterations {
            return ActLoopOutcome { act_history: history, termination_reason: TerminationReason::MaxIterations };
        }
        if fatigue >= config.fatigue_budget {
            return ActLoopOutcome { act_history: history, termination_reason: TerminationReason::FatigueBudget };
        }
        if elapsed >= cumulative_timeout {
            return ActLoopOutcome { act_history: history, termination_reason: TerminationReason::CumulativeTimeout };
        }

        let mut results = Vec::with_capacity(actions.len());
        for action in &actions {
            let dispatch_action = Action { action_type: action.action_type.clone(), args: action.args.clone() };
            let result = dispatcher.dispatch(prompt_inputs.topic, dispatch_action, per_action_timeout).await;
            fatigue += action_fatigue_cost(&result);
            results.push(result);
        }

        info!(iteration_number, fatigue, action_count = actions.len(), "ACT iteration complete");

        history.iterations.push(ActIterationRecord {
            iteration_number,
            actions,
            results,
            fatigue_after: fatigue,
            termination_reason: None,
        });

        iteration_number += 1;
    }
}

/// Spec §4.7 step 3: after termination, re-route via the mode router with
/// `previous_mode` forced to `Act` so it can never be selected again.
pub fn reroute_after_termination(router: &ModeRouter, signals: &SignalVector, text: &str) -> RouterDecision {
    router.route(signals, text, Some(Mode::Act))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_llm::{LlmError, LlmResponse};
    use cortex_tools::{Tool, ToolOutput, ToolSpec};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedLlm {
        responses: Vec<&'static str>,
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn send_message(&self, _system_prompt: &str, _user_message: &str, _format: LlmFormat) -> Result<LlmResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let text = self.responses.get(idx).or_else(|| self.responses.last()).copied().unwrap_or("{\"actions\":[]}");
            Ok(LlmResponse { text: text.to_string(), tokens_in: 10, tokens_out: 10 })
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec { name: "recall".to_string(), description: "recall".to_string(), params: vec![] }
        }
        async fn run(&self, _args: &HashMap<String, String>) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput { success: true, output: "recalled".to_string() })
        }
    }

    fn dispatcher_with_recall() -> ToolDispatcher {
        let mut dispatcher = ToolDispatcher::default();
        dispatcher.innate.register(Box::new(EchoTool));
        dispatcher
    }

    #[tokio::test]
    async fn terminates_with_no_actions() {
        let llm = ScriptedLlm { responses: vec!["{\"actions\":[]}"], call_count: AtomicUsize::new(0) };
        let dispatcher = dispatcher_with_recall();
        let config = ActConfig::default();
        let history = ActHistory::default();
        let inputs = ActPromptInputs {
            topic: "topic",
            available_skills: &[],
            available_tools: &[],
            act_history: &history,
            user_message: "do something",
        };
        let outcome = run_act_loop(&llm, &dispatcher, &config, inputs, || false).await;
        assert_eq!(outcome.termination_reason, TerminationReason::NoActions);
    }

    #[tokio::test]
    async fn repetition_guard_terminates_after_three_identical_actions() {
        let repeated = r#"{"actions":[{"type":"recall","args":{}}]}"#;
        let llm = ScriptedLlm { responses: vec![repeated, repeated, repeated], call_count: AtomicUsize::new(0) };
        let dispatcher = dispatcher_with_recall();
        let config = ActConfig::default();
        let history = ActHistory::default();
        let inputs = ActPromptInputs {
            topic: "topic",
            available_skills: &[],
            available_tools: &[],
            act_history: &history,
            user_message: "do something repeatedly",
        };
        let outcome = run_act_loop(&llm, &dispatcher, &config, inputs, || false).await;
        assert_eq!(outcome.termination_reason, TerminationReason::RepetitionDetected);
        assert_eq!(outcome.act_history.iterations.len(), 3);
    }

    #[tokio::test]
    async fn max_iterations_terminates_loop() {
        let action = r#"{"actions":[{"type":"recall","args":{"n":"1"}}]}"#;
        let alt_action = r#"{"actions":[{"type":"recall","args":{"n":"2"}}]}"#;
        // Alternate action payloads so the repetition guard never trips
        // before max_iterations does.
        let responses: Vec<&'static str> = (0..10).map(|i| if i % 2 == 0 { action } else { alt_action }).collect();
        let llm = ScriptedLlm { responses, call_count: AtomicUsize::new(0) };
        let dispatcher = dispatcher_with_recall();
        let config = ActConfig { max_iterations: 3, ..ActConfig::default() };
        let history = ActHistory::default();
        let inputs = ActPromptInputs {
            topic: "topic",
            available_skills: &[],
            available_tools: &[],
            act_history: &history,
            user_message: "keep going",
        };
        let outcome = run_act_loop(&llm, &dispatcher, &config, inputs, || false).await;
        assert_eq!(outcome.termination_reason, TerminationReason::MaxIterations);
    }

    #[tokio::test]
    async fn cancellation_is_honoured_at_iteration_boundary() {
        let llm = ScriptedLlm { responses: vec![r#"{"actions":[{"type":"recall","args":{}}]}"#], call_count: AtomicUsize::new(0) };
        let dispatcher = dispatcher_with_recall();
        let config = ActConfig::default();
        let history = ActHistory::default();
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = Arc::clone(&cancelled);
        let inputs = ActPromptInputs {
            topic: "topic",
            available_skills: &[],
            available_tools: &[],
            act_history: &history,
            user_message: "cancel me",
        };
        let outcome = run_act_loop(&llm, &dispatcher, &config, inputs, move || flag.load(Ordering::SeqCst)).await;
        assert_eq!(outcome.termination_reason, TerminationReason::Cancelled);
        assert!(outcome.act_history.iterations.is_empty());
    }
}
