//! C16 — the digest pipeline: the five phases from spec §4.4, wired
//! against the memory lattice, classifiers, and mode router. Grounded on
//! `crates/runtime/src/runtime/chat.rs`'s prompt-assembly shape, with the
//! fast/slow path split and cycle bookkeeping from the original digest
//! worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cortex_act::{ActHistory, ActLoopOutcome, ActPromptInputs, reroute_after_termination, run_act_loop};
use cortex_classify::{ToolRelevanceResult, ToolSource, classify_intent};
use cortex_config::{ActConfig, DigestConfig, RouterConfig};
use cortex_core::{ChatRequest, Cycle, CycleType, Exchange, Thread};
use cortex_events::{EncodeEvent, EncodeEventBus};
use cortex_llm::{LlmFormat, LlmProvider};
use cortex_memory::{Embedding, FactStore, GistStore, TurnRole};
use cortex_memory::working_memory::{Turn, WorkingMemoryStore};
use cortex_queue::NamedQueue;
use cortex_router::{Mode, ModeRouter, SignalVector};
use cortex_tools::ToolDispatcher;
use futures::future::BoxFuture;
use tracing::info;

use crate::context::{WorldStateSource, build_context_block, context_warmth, world_state_nonempty};
use crate::cycles::CycleTracker;
use crate::fast_path::{extract_topic_phrase, select_fast_path_ack};
use crate::proactive::ProactiveFeedback;
use crate::prompt::{build_terminal_system_prompt, fallback_text};
use crate::reward::{BehaviourRewardCache, estimate_behaviour_reward};

/// An async embedding function: `text -> Option<embedding>`. Grounded on
/// the runtime's `make_ollama_embed_fn` shape (an `Arc`-wrapped closure
/// returning a boxed future so it can be shared across worker tasks).
pub type EmbedFn = Arc<dyn Fn(&str) -> BoxFuture<'static, Option<Embedding>> + Send + Sync>;

/// Outcome of one call to [`run_digest`].
#[derive(Debug)]
pub enum DigestOutcome {
    /// Bypassed the rest of the pipeline: a semantically similar
    /// tool-work cycle is already in flight.
    Progress { message: String },
    /// Fast path: a template acknowledgement was delivered immediately
    /// and a tool-worker job was enqueued.
    FastPathAck { exchange: Exchange, ack_text: String, tool_job_id: uuid::Uuid },
    /// Normal or slow-ACT path: a single generated response.
    Generated { exchange: Exchange, mode: Mode, response_text: String, act_outcome: Option<ActLoopOutcome> },
}

/// Everything the pipeline needs for one call, borrowed from whatever
/// owns the memory lattice and ambient services (the runtime's per-user
/// session state). None of it is owned by the pipeline itself — C16 has
/// no state of its own beyond what's passed in.
pub struct DigestContext<'a> {
    pub working_memory: &'a mut WorkingMemoryStore,
    pub gists: &'a mut GistStore,
    pub facts: &'a FactStore,
    pub topic_classifier: &'a mut cortex_classify::TopicClassifier,
    pub tool_relevance: &'a cortex_classify::ToolRelevanceScorer,
    pub router: &'a ModeRouter,
    pub cycles: &'a mut CycleTracker,
    pub reward_cache: &'a mut BehaviourRewardCache,
    pub encode_bus: &'a EncodeEventBus,
    pub world_state: &'a dyn WorldStateSource,
    pub proactive: &'a dyn ProactiveFeedback,
    pub llm: &'a dyn LlmProvider,
    pub dispatcher: &'a ToolDispatcher,
    pub tool_queue: &'a Arc<NamedQueue>,
    pub digest_config: &'a DigestConfig,
    pub router_config: &'a RouterConfig,
    pub act_config: &'a ActConfig,
    pub voice_lines: &'a [String],
    pub embed: &'a EmbedFn,
    /// The mode this topic's last routing decision landed on, so the
    /// router's anti-oscillation rule has something to compare against.
    pub previous_mode: Option<Mode>,
}

fn commit_phase_d(ctx: &mut DigestContext<'_>, thread: &Thread, exchange: &Exchange, response_text: &str) {
    ctx.working_memory.append(thread.id, Turn::assistant(response_text.to_string()));
    info!(event = "system_response", topic = %exchange.topic, thread_id = %thread.id, "assistant response committed");
    ctx.encode_bus.publish(EncodeEvent::assistant_half(exchange.topic.clone(), exchange.id, thread.id, response_text));
}

/// Runs the full five-phase digest pipeline for one inbound message
/// (spec §4.4). `thread` is mutated in place (topic history, activity).
pub async fn run_digest(ctx: &mut DigestContext<'_>, thread: &mut Thread, request: &ChatRequest) -> anyhow::Result<DigestOutcome> {
    let user_text = request.text.trim();
    let now = Utc::now();

    // ── Phase A: immediate commit ──────────────────────────────────────
    let previous_user_turn = ctx
        .working_memory
        .turns(thread.id)
        .into_iter()
        .rev()
        .find(|t| t.role == TurnRole::User)
        .map(|t| t.content);
    let recent_reply_lengths = ctx.working_memory.recent_user_reply_lengths(thread.id, 2);

    ctx.working_memory.append(thread.id, Turn::user(user_text.to_string()));
    info!(event = "user_input", thread_id = %thread.id, "user message received");

    if let Some(previous) = &previous_user_turn {
        let reward = estimate_behaviour_reward(user_text, previous);
        ctx.reward_cache.set(&thread.current_topic, reward, now);
    }
    let _proactive_outcome = ctx.proactive.correlate(&thread.current_topic, user_text);

    let declining_reply_length = recent_reply_lengths.len() == 2
        && (recent_reply_lengths[1] as f32) < (recent_reply_lengths[0] as f32) * ctx.router_config.declining_reply_len_ratio;

    // ── Phase B: retrieval ──────────────────────────────────────────────
    let embedding = (ctx.embed)(user_text).await.unwrap_or_default();
    let previous_topic = thread.current_topic.clone();
    let gists = ctx.gists.read(&previous_topic);
    let last_exchange_fallback = ctx.gists.last_exchange(&previous_topic).map(|s| s.to_string());
    let world_summary = ctx.world_state.summary(thread.id);
    let warmth = context_warmth(
        ctx.working_memory.depth(thread.id),
        ctx.gists.real_gist_count(&previous_topic),
        world_state_nonempty(&world_summary),
    );

    // ── Phase C: classification, routing, generation ────────────────────
    let recent_topic_opt = if previous_topic.is_empty() { None } else { Some(previous_topic.as_str()) };
    let topic_result = ctx.topic_classifier.classify(user_text, &embedding, recent_topic_opt);
    let topic = topic_result.topic.clone();

    let mut exchange = Exchange::new(thread.id, topic.clone(), user_text);
    thread.record_topic(topic.clone());
    ctx.encode_bus.publish(EncodeEvent::user_half(topic.clone(), exchange.id, thread.id, user_text));

    let intent = classify_intent(user_text);
    let relevant: Vec<ToolRelevanceResult> = ctx.tool_relevance.top_k(&embedding, 5);
    let max_tool_relevance = relevant.first().map(|r| r.relevance).unwrap_or(0.0);

    if intent.is_cancel || intent.is_self_resolved {
        let cancelled = ctx.cycles.cancel_active_tool_work(&topic);
        info!(cancelled, topic = %topic, "cancelled active tool work on cancel/self-resolved intent");
    } else if let Some(progress) = ctx.cycles.check_in_flight(&topic, &embedding, ctx.digest_config.in_flight_cosine_threshold, now) {
        return Ok(DigestOutcome::Progress { message: progress });
    }

    let signals = SignalVector {
        working_memory_fill: ctx.working_memory.fill_ratio(thread.id),
        gist_count: gists.len(),
        fact_count: ctx.facts.all(&topic).len(),
        intent: intent.clone(),
        max_tool_relevance,
        topic_confidence: topic_result.confidence,
        context_warmth: warmth,
        declining_reply_length,
    };

    let decision = ctx.router.route(&signals, user_text, ctx.previous_mode);

    let fast_path_eligible = max_tool_relevance > ctx.digest_config.fast_path_relevance_threshold
        && warmth >= ctx.digest_config.fast_path_context_warmth_min
        && !intent.is_cancel
        && !intent.is_self_resolved;

    if fast_path_eligible && decision.mode == Mode::Act {
        return run_fast_path(ctx, thread, &mut exchange, &topic, user_text, &intent, &relevant, &embedding, warmth).await;
    }

    match decision.mode {
        Mode::Act => run_slow_path_act(ctx, thread, &mut exchange, &topic, user_text, &signals).await,
        Mode::Ignore => Ok(DigestOutcome::Generated { exchange, mode: Mode::Ignore, response_text: String::new(), act_outcome: None }),
        terminal_mode => {
            let context_block = build_context_block(&gists, last_exchange_fallback.as_deref(), &ctx.facts.formatted(&topic), &world_summary);
            let system_prompt = build_terminal_system_prompt(terminal_mode, &topic, &context_block, ctx.voice_lines);
            let response_text = match ctx.llm.send_message(&system_prompt, user_text, LlmFormat::Text).await {
                Ok(response) if !response.text.trim().is_empty() => response.text,
                _ => fallback_text(terminal_mode).to_string(),
            };
            exchange.response_text = response_text.clone();
            commit_phase_d(ctx, thread, &exchange, &response_text);
            Ok(DigestOutcome::Generated { exchange, mode: terminal_mode, response_text, act_outcome: None })
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_fast_path(
    ctx: &mut DigestContext<'_>,
    thread: &mut Thread,
    exchange: &mut Exchange,
    topic: &str,
    user_text: &str,
    intent: &cortex_classify::IntentClassification,
    relevant: &[ToolRelevanceResult],
    embedding: &Embedding,
    warmth: f32,
) -> anyhow::Result<DigestOutcome> {
    let is_reflective = relevant.first().map(|r| r.source == ToolSource::InnateSkill).unwrap_or(true);
    let topic_phrase = extract_topic_phrase(user_text);
    let ack_text = select_fast_path_ack(intent, is_reflective, &topic_phrase);

    exchange.response_text = ack_text.clone();
    // Phase D's working-memory commit still happens; the encode_event's
    // assistant half is skipped because a template ack has no semantic
    // content worth writing to memory (spec §4.4).
    ctx.working_memory.append(thread.id, Turn::assistant(ack_text.clone()));
    info!(event = "system_response", fast_path = true, topic = %topic, "template acknowledgement delivered");

    let user_cycle = Cycle::root(CycleType::UserInput, topic.to_string());
    let ack_cycle = user_cycle.child(CycleType::FastResponse);
    let tool_cycle = user_cycle.child(CycleType::ToolWork);
    ctx.cycles.register(tool_cycle.clone(), user_text, embedding.clone());

    let payload = serde_json::json!({
        "parent_cycle_id": ack_cycle.cycle_id,
        "root_cycle_id": user_cycle.cycle_id,
        "tool_cycle_id": tool_cycle.cycle_id,
        "topic": topic,
        "text": user_text,
        "thread_id": thread.id,
        "tool_hints": intent.tool_hints,
        "relevant_tools": relevant.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
        "context_warmth": warmth,
    });
    let tool_job_id = ctx.tool_queue.push(payload).await;

    info!(
        user_cycle = %user_cycle.cycle_id,
        ack_cycle = %ack_cycle.cycle_id,
        tool_job = %tool_job_id,
        "fast path: ack delivered, tool work spawned"
    );

    Ok(DigestOutcome::FastPathAck { exchange: exchange.clone(), ack_text, tool_job_id })
}

async fn run_slow_path_act(
    ctx: &mut DigestContext<'_>,
    thread: &mut Thread,
    exchange: &mut Exchange,
    topic: &str,
    user_text: &str,
    signals: &SignalVector,
) -> anyhow::Result<DigestOutcome> {
    let skills: Vec<String> = ctx.dispatcher.innate.list_specs().into_iter().map(|s| s.name).collect();
    let tools: Vec<String> = Vec::new();
    let act_history = ActHistory::default();
    let inputs = ActPromptInputs {
        topic,
        available_skills: &skills,
        available_tools: &tools,
        act_history: &act_history,
        user_message: user_text,
    };

    let outcome = run_act_loop(ctx.llm, ctx.dispatcher, ctx.act_config, inputs, || false).await;
    let reroute = reroute_after_termination(ctx.router, signals, user_text);
    let context_block = outcome.act_history.as_context_string();
    let system_prompt = build_terminal_system_prompt(reroute.mode, topic, &context_block, ctx.voice_lines);

    let response_text = match ctx.llm.send_message(&system_prompt, user_text, LlmFormat::Text).await {
        Ok(response) if !response.text.trim().is_empty() => response.text,
        _ => fallback_text(reroute.mode).to_string(),
    };

    exchange.response_text = response_text.clone();
    commit_phase_d(ctx, thread, exchange, &response_text);

    Ok(DigestOutcome::Generated { exchange: exchange.clone(), mode: reroute.mode, response_text, act_outcome: Some(outcome) })
}

/// Phase E async follow-up: was the thread idle long enough, since the
/// last committed exchange, to count as an episode boundary (spec §4.4,
/// fed to the episodic worker's inactivity trigger rather than decided
/// here).
pub fn inactivity_episode_trigger(idle: Duration, threshold_secs: i64) -> bool {
    idle.as_secs() as i64 >= threshold_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_config::AppConfig;
    use cortex_core::MessageSource;
    use cortex_memory::{GistStore, FactStore};
    use cortex_classify::{ToolRelevanceScorer, TopicClassifier};
    use cortex_tools::ToolDispatcher;
    use async_trait::async_trait;
    use cortex_llm::{LlmError, LlmResponse};
    use crate::context::NullWorldState;
    use crate::proactive::NullProactiveFeedback;

    struct StubLlm;

    #[async_trait]
    impl LlmProvider for StubLlm {
        async fn send_message(&self, _system_prompt: &str, _user_message: &str, _format: LlmFormat) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse { text: "a generated reply".to_string(), tokens_in: 1, tokens_out: 1 })
        }
    }

    fn no_embed() -> EmbedFn {
        Arc::new(|_text: &str| Box::pin(async { None }))
    }

    #[tokio::test]
    async fn cold_start_hello_routes_to_acknowledge_and_commits_both_turns() {
        let app_config = AppConfig::default();
        let mut working_memory = WorkingMemoryStore::new(app_config.memory.max_turns);
        let mut gists = GistStore::new(
            app_config.memory.max_gists,
            app_config.memory.max_per_type,
            app_config.memory.gist_jaccard_threshold,
            app_config.memory.min_gist_confidence,
            app_config.memory.gist_ttl_secs,
        );
        let facts = FactStore::new(app_config.memory.fact_ttl_secs);
        let mut topic_classifier = TopicClassifier::new(0.75);
        let tool_relevance = ToolRelevanceScorer::new();
        let router = ModeRouter::new(cortex_router::RouterWeights::default(), app_config.router.tie_break_delta);
        let mut cycles = CycleTracker::new();
        let mut reward_cache = BehaviourRewardCache::new();
        let encode_bus = EncodeEventBus::new();
        let world_state = NullWorldState;
        let proactive = NullProactiveFeedback;
        let llm = StubLlm;
        let dispatcher = ToolDispatcher::default();
        let tool_queue = NamedQueue::new("tool", Duration::from_secs(60));
        let embed = no_embed();

        let mut ctx = DigestContext {
            working_memory: &mut working_memory,
            gists: &mut gists,
            facts: &facts,
            topic_classifier: &mut topic_classifier,
            tool_relevance: &tool_relevance,
            router: &router,
            cycles: &mut cycles,
            reward_cache: &mut reward_cache,
            encode_bus: &encode_bus,
            world_state: &world_state,
            proactive: &proactive,
            llm: &llm,
            dispatcher: &dispatcher,
            tool_queue: &tool_queue,
            digest_config: &app_config.digest,
            router_config: &app_config.router,
            act_config: &app_config.act,
            voice_lines: &[],
            embed: &embed,
            previous_mode: None,
        };

        let mut thread = Thread::new("u1", "web", "test");
        let request = ChatRequest { text: "Hello".to_string(), source: MessageSource::Text, attachments: vec![], request_id: uuid::Uuid::new_v4() };

        let outcome = run_digest(&mut ctx, &mut thread, &request).await.unwrap();
        match outcome {
            DigestOutcome::Generated { mode, response_text, .. } => {
                assert_eq!(mode, Mode::Acknowledge);
                assert!(!response_text.is_empty());
            }
            other => panic!("expected a generated terminal response, got {other:?}"),
        }
        assert_eq!(working_memory.turns(thread.id).len(), 2);
    }

    #[test]
    fn inactivity_trigger_fires_past_threshold() {
        assert!(inactivity_episode_trigger(Duration::from_secs(700), 600));
        assert!(!inactivity_episode_trigger(Duration::from_secs(100), 600));
    }
}
