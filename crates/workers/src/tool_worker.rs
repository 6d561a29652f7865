//! C20 — tool worker: runs the same ACT loop as the inline tool path, but
//! dequeued off the tool-work queue so a long tool chain never blocks the
//! user-facing digest response (spec §4.12). Payload shape is exactly what
//! `cortex_digest::pipeline::run_fast_path` enqueues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cortex_act::{run_act_loop, ActLoopOutcome, ActPromptInputs};
use cortex_config::ActConfig;
use cortex_core::{CycleId, ExchangeId, ThreadId};
use cortex_exec::ToolPerfTracker;
use cortex_llm::LlmProvider;
use cortex_memory::embedding::cosine_similarity;
use cortex_tools::ToolDispatcher;
use serde::Deserialize;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Matches exactly the object `run_fast_path` builds when it hands a tool
/// decision off to the tool queue.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolJobPayload {
    pub parent_cycle_id: CycleId,
    pub root_cycle_id: CycleId,
    pub tool_cycle_id: CycleId,
    pub topic: String,
    pub text: String,
    pub thread_id: ThreadId,
    #[serde(default)]
    pub tool_hints: Vec<String>,
    #[serde(default)]
    pub relevant_tools: Vec<String>,
    #[serde(default)]
    pub context_warmth: f32,
}

const HEARTBEAT_TTL_SECS: i64 = 30;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// In-memory stand-in for a Redis `heartbeat:{job_id}` key with a 30s TTL
/// (spec §4.12: "no external store, an in-memory registry with the same
/// liveness semantics is sufficient at this scale").
#[derive(Default)]
pub struct HeartbeatRegistry {
    beats: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn beat(&self, job_id: Uuid, now: DateTime<Utc>) {
        self.beats.lock().await.insert(job_id, now);
    }

    pub async fn is_alive(&self, job_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.beats.lock().await.get(&job_id) {
            Some(last) => (now - *last).num_seconds() < HEARTBEAT_TTL_SECS,
            None => false,
        }
    }

    pub async fn clear(&self, job_id: Uuid) {
        self.beats.lock().await.remove(&job_id);
    }
}

/// Spawns a task that writes a heartbeat for `job_id` every
/// [`HEARTBEAT_INTERVAL_SECS`] until `done` fires — mirrors the ACT loop's
/// own iteration cadence, since a job can run for many iterations before
/// terminating (spec §4.12).
pub fn spawn_heartbeat(registry: Arc<HeartbeatRegistry>, job_id: Uuid, mut done: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    registry.beat(job_id, Utc::now()).await;
                }
                _ = done.changed() => {
                    break;
                }
            }
        }
    })
}

/// Runs the tool job's ACT loop, recording per-tool perf for every external
/// tool dispatch along the way (spec §11 supplement: the tool worker reuses
/// `cortex_exec::ToolPerfTracker` rather than re-implementing it).
pub async fn run_tool_job(
    llm: &dyn LlmProvider,
    dispatcher: &ToolDispatcher,
    config: &ActConfig,
    payload: &ToolJobPayload,
    available_skills: &[String],
    perf: &ToolPerfTracker,
    is_cancelled: impl FnMut() -> bool,
) -> ActLoopOutcome {
    let prompt_inputs = ActPromptInputs {
        topic: &payload.topic,
        available_skills,
        available_tools: &payload.relevant_tools,
        act_history: &Default::default(),
        user_message: &payload.text,
    };

    let outcome = run_act_loop(llm, dispatcher, config, prompt_inputs, is_cancelled).await;

    for iteration in &outcome.act_history.iterations {
        for (action, result) in iteration.actions.iter().zip(iteration.results.iter()) {
            if dispatcher.external_manifest(&action.action_type).is_some() {
                let success = matches!(result.status, cortex_tools::DispatchStatus::Success);
                let timed_out = matches!(result.status, cortex_tools::DispatchStatus::Timeout);
                perf.record(&action.action_type, success, timed_out, result.execution_time_ms);
            }
        }
    }

    outcome
}

/// Stale-topic check (spec §4.12): a tool result's follow-up is discarded
/// as a background gist rather than surfaced if the user has since moved
/// to an unrelated topic (`cosine < 0.45`).
pub const STALE_FOLLOWUP_COSINE_THRESHOLD: f32 = 0.45;

pub fn should_suppress_followup(original_topic_embedding: &[f32], current_topic_embedding: &[f32]) -> bool {
    cosine_similarity(original_topic_embedding, current_topic_embedding) < STALE_FOLLOWUP_COSINE_THRESHOLD
}

/// Tracks how many times a follow-up has been deferred so a chronically
/// undeliverable message eventually gets suppressed instead of queued
/// forever (spec §4.12: "suppressed after N deferrals").
#[derive(Default)]
pub struct DeferralTracker {
    counts: HashMap<Uuid, u32>,
}

pub const MAX_DEFERRALS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    Immediate,
    Deferred,
    Suppressed,
}

impl DeferralTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_deferral(&mut self, output_id: Uuid) -> u32 {
        let count = self.counts.entry(output_id).or_insert(0);
        *count += 1;
        *count
    }

    pub fn is_suppressed(&self, output_id: Uuid) -> bool {
        self.counts.get(&output_id).copied().unwrap_or(0) >= MAX_DEFERRALS
    }
}

/// Decides how to deliver a completed tool-job's follow-up (spec §4.12):
/// a stale topic discards it outright; otherwise an active/open thread
/// delivers immediately, and a thread with no active listener defers
/// (tracked via `DeferralTracker`) until it is suppressed.
pub fn decide_delivery(is_stale: bool, thread_has_active_listener: bool, tracker: &mut DeferralTracker, output_id: Uuid) -> DeliveryDecision {
    if is_stale {
        return DeliveryDecision::Suppressed;
    }
    if thread_has_active_listener {
        return DeliveryDecision::Immediate;
    }
    tracker.record_deferral(output_id);
    if tracker.is_suppressed(output_id) {
        DeliveryDecision::Suppressed
    } else {
        DeliveryDecision::Deferred
    }
}

/// Builds the `type=tool_result` follow-up message body from a completed
/// job's act history (spec §4.12), unless the run emitted a visual card —
/// in which case the caller suppresses the follow-up entirely.
pub fn build_followup_message(outcome: &ActLoopOutcome) -> Option<String> {
    if outcome.act_history.emitted_card() {
        return None;
    }
    Some(outcome.act_history.as_context_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_registry_tracks_liveness_and_ttl() {
        let registry = HeartbeatRegistry::new();
        let job_id = Uuid::new_v4();
        let now = Utc::now();
        registry.beat(job_id, now).await;
        assert!(registry.is_alive(job_id, now).await);
        assert!(!registry.is_alive(job_id, now + chrono::Duration::seconds(HEARTBEAT_TTL_SECS + 1)).await);
    }

    #[test]
    fn suppress_followup_on_stale_topic() {
        let original = vec![1.0, 0.0];
        let current = vec![0.0, 1.0];
        assert!(should_suppress_followup(&original, &current));
    }

    #[test]
    fn does_not_suppress_followup_on_same_topic() {
        let original = vec![1.0, 0.0];
        let current = vec![1.0, 0.0];
        assert!(!should_suppress_followup(&original, &current));
    }

    #[test]
    fn delivery_decision_suppresses_stale_messages_immediately() {
        let mut tracker = DeferralTracker::new();
        let output_id = Uuid::new_v4();
        assert_eq!(decide_delivery(true, true, &mut tracker, output_id), DeliveryDecision::Suppressed);
    }

    #[test]
    fn delivery_decision_defers_then_suppresses_after_max_deferrals() {
        let mut tracker = DeferralTracker::new();
        let output_id = Uuid::new_v4();
        for _ in 0..MAX_DEFERRALS - 1 {
            assert_eq!(decide_delivery(false, false, &mut tracker, output_id), DeliveryDecision::Deferred);
        }
        assert_eq!(decide_delivery(false, false, &mut tracker, output_id), DeliveryDecision::Suppressed);
    }

    #[test]
    fn delivery_decision_is_immediate_with_active_listener() {
        let mut tracker = DeferralTracker::new();
        let output_id = Uuid::new_v4();
        assert_eq!(decide_delivery(false, true, &mut tracker, output_id), DeliveryDecision::Immediate);
    }
}
