//! Wires the background worker pack (spec §4.8-§4.12) onto literal
//! queues: a broadcast-bridge task folds the encode bus's two turn
//! halves into one memory-chunker job, and `cortex_queue::run_worker`
//! drives each of memory-chunker, episodic, semantic-consolidation, and
//! tool to completion, calling straight into `cortex_workers`'
//! near-pure functions. The "prompt" queue from the distilled design
//! doesn't exist as a literal queue here: `submit_message` calls
//! `run_digest` directly, since nothing in the lattice needs a prompt
//! dequeued off a worker rather than answered inline. The "output"
//! queue is the ring buffer in `notifications.rs`.

use std::sync::Arc;

use cortex_memory::semantic::SemanticStore;
use cortex_queue::{run_worker, Job, JobOutcome, NamedQueue};
use cortex_workers::chunker::{
    self, ChunkerInput, ChunkerStaging, ChunkerStoreContext,
};
use cortex_workers::episodic::{self, EpisodeExtraction};
use cortex_workers::semantic::{self, ConsolidationOutput};
use cortex_workers::tool_worker::{self, DeferralTracker, HeartbeatRegistry, ToolJobPayload};
use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tracing::{error, warn};

use crate::state::AppState;

/// Minimum turns since the last episode before one is considered, absent
/// the inactivity trigger — the spec names the inactivity half via
/// `DigestConfig::inactivity_episode_trigger_secs` but leaves this count
/// unspecified; three matches the chunker cadence (one chunk per turn).
const EPISODE_MIN_TURNS: u32 = 3;

/// Subscribes to the encode bus and assembles both turn-halves of an
/// exchange into one memory-chunker job (spec §4.8's "one chunk per
/// exchange").
pub fn spawn_encode_bridge(state: Arc<AppState>, mut shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    let mut rx = state.encode_bus.subscribe();
    tokio::spawn(async move {
        let staging = Mutex::new(ChunkerStaging::new());
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "encode bridge lagged, some turn halves were dropped");
                            continue;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    };

                    let assembled = staging.lock().await.observe(
                        event.exchange_id,
                        event.thread_id,
                        &event.topic,
                        &event.prompt_message,
                        &event.response_message,
                    );
                    if let Some(assembled) = assembled {
                        let payload = serde_json::json!({
                            "exchange_id": event.exchange_id,
                            "thread_id": assembled.thread_id,
                            "topic": assembled.topic,
                            "prompt_message": assembled.prompt_message,
                            "response_message": assembled.response_message,
                        });
                        state.memory_chunker_queue.push(payload).await;
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct ChunkerJobPayload {
    exchange_id: uuid::Uuid,
    thread_id: uuid::Uuid,
    topic: String,
    prompt_message: String,
    response_message: String,
}

fn previous_assistant_turn(working_memory: &cortex_memory::WorkingMemoryStore, thread_id: cortex_core::ThreadId) -> String {
    working_memory
        .turns(thread_id)
        .into_iter()
        .rev()
        .filter(|t| t.role == cortex_memory::TurnRole::Assistant)
        .nth(1)
        .map(|t| t.content)
        .unwrap_or_default()
}

pub fn spawn_memory_chunker_worker(state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    let queue = state.memory_chunker_queue.clone();
    let backoff_max = state.config.queue.backoff_max_secs;
    tokio::spawn(run_worker(queue, backoff_max, shutdown_rx, move |job: Job| {
        let state = state.clone();
        async move {
            let payload: ChunkerJobPayload = match serde_json::from_value(job.payload.clone()) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(?err, "memory chunker: malformed job payload");
                    return JobOutcome::Fail;
                }
            };

            let input = ChunkerInput { topic: &payload.topic, prompt_text: &payload.prompt_message, response_text: &payload.response_message };
            let Some(output) = chunker::run_memory_chunker(state.llm.as_ref(), input).await else {
                return JobOutcome::Retry;
            };

            {
                let mut gists = state.gists.lock().await;
                let mut facts = state.facts.lock().await;
                let mut traits = state.traits.lock().await;
                let mut store_ctx = ChunkerStoreContext {
                    gists: &mut gists,
                    facts: &mut facts,
                    traits: &mut traits,
                    min_fact_confidence: state.config.memory.min_fact_confidence,
                };
                chunker::apply_chunker_output(&mut store_ctx, &payload.topic, &output);
                chunker::apply_micro_preferences(&payload.prompt_message, &mut traits);

                let working_memory = state.working_memory.lock().await;
                let previous_response = previous_assistant_turn(&working_memory, payload.thread_id);
                drop(working_memory);
                chunker::apply_challenge_reaction(&previous_response, &payload.prompt_message, &mut traits);
            }

            {
                let now = chrono::Utc::now();
                let reward_signal = state.reward_cache.lock().await.get_fresh(&payload.topic, now).unwrap_or(0.5);
                let mut identity = state.identity.lock().await;
                chunker::apply_emotion_to_identity(&output, reward_signal, &mut identity);
            }

            chunker::enqueue_episodic_job(&state.episodic_queue, &payload.topic, payload.exchange_id, payload.thread_id).await;
            JobOutcome::Success
        }
    }))
}

#[derive(Debug, Deserialize)]
struct EpisodicJobPayload {
    exchange_id: Option<uuid::Uuid>,
    thread_id: uuid::Uuid,
    topic: String,
    #[serde(default)]
    forced: bool,
}

pub fn spawn_episodic_worker(state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    let queue = state.episodic_queue.clone();
    let backoff_max = state.config.queue.backoff_max_secs;
    tokio::spawn(run_worker(queue, backoff_max, shutdown_rx, move |job: Job| {
        let state = state.clone();
        async move {
            let payload: EpisodicJobPayload = match serde_json::from_value(job.payload.clone()) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(?err, "episodic worker: malformed job payload");
                    return JobOutcome::Fail;
                }
            };

            if !payload.forced {
                let turns_since_last = state.exchanges.turns_since_last_episode(payload.thread_id).await;
                let idle_secs = state.exchanges.idle_secs(payload.thread_id).await;
                if !episodic::is_ready_for_episode(turns_since_last, EPISODE_MIN_TURNS, idle_secs, state.config.digest.inactivity_episode_trigger_secs) {
                    return JobOutcome::Success;
                }
            }

            let exchange = match payload.exchange_id {
                Some(id) => state.exchanges.get(id).await,
                None => state.exchanges.latest_for_thread(payload.thread_id).await,
            };
            let Some(exchange) = exchange else {
                return JobOutcome::Success;
            };

            let extraction: EpisodeExtraction = episodic::extract_episode(state.llm.as_ref(), &exchange.prompt_text, &exchange.response_text).await;
            let embedding = (state.embed)(&extraction.gist).await.unwrap_or_default();

            let turn_count = {
                let working_memory = state.working_memory.lock().await;
                working_memory.depth(payload.thread_id) as u32
            };
            let durability = episodic::classify_durability(&payload.topic, turn_count);

            {
                let mut episodes = state.episodes.lock().await;
                episodic::apply_episode_extraction(&mut episodes, &payload.topic, exchange.id, &extraction, embedding, durability);
            }
            state.exchanges.mark_episode_queued(payload.thread_id).await;

            let unconsolidated_count = {
                let episodes = state.episodes.lock().await;
                semantic::select_consolidation_batch(&episodes, &payload.topic).len()
            };
            if unconsolidated_count >= state.config.scheduler.idle_consolidation_min_episodes {
                state.semantic_queue.push(serde_json::json!({ "topic": payload.topic })).await;
            }

            JobOutcome::Success
        }
    }))
}

#[derive(Debug, Deserialize)]
struct SemanticJobPayload {
    topic: String,
}

pub fn spawn_semantic_worker(state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    let queue = state.semantic_queue.clone();
    let backoff_max = state.config.queue.backoff_max_secs;
    tokio::spawn(run_worker(queue, backoff_max, shutdown_rx, move |job: Job| {
        let state = state.clone();
        async move {
            let payload: SemanticJobPayload = match serde_json::from_value(job.payload.clone()) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(?err, "semantic consolidation: malformed job payload");
                    return JobOutcome::Fail;
                }
            };

            let mut episodes = state.episodes.lock().await;
            let batch = semantic::select_consolidation_batch(&episodes, &payload.topic);
            if batch.is_empty() {
                return JobOutcome::Success;
            }
            let episode_ids: Vec<uuid::Uuid> = batch.iter().map(|e| e.id).collect();

            let output: Option<ConsolidationOutput> = semantic::run_semantic_consolidation(state.llm.as_ref(), &payload.topic, &batch).await;
            let Some(output) = output else {
                semantic::mark_batch_consolidated(&mut episodes, &episode_ids, false);
                return JobOutcome::Retry;
            };
            drop(episodes);

            let mut embeddings = Vec::with_capacity(output.concepts.len());
            for concept in &output.concepts {
                embeddings.push((state.embed)(&concept.definition).await.unwrap_or_default());
            }

            {
                let mut semantic_store: tokio::sync::MutexGuard<'_, SemanticStore> = state.semantic.lock().await;
                semantic::apply_concepts(&mut semantic_store, &output.concepts, &embeddings);
                semantic::apply_relationships(&mut semantic_store, &output.relationships);
            }

            let mut episodes = state.episodes.lock().await;
            semantic::mark_batch_consolidated(&mut episodes, &episode_ids, true);
            JobOutcome::Success
        }
    }))
}

pub fn spawn_tool_worker(state: Arc<AppState>, shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
    let queue = state.tool_queue.clone();
    let backoff_max = state.config.queue.backoff_max_secs;
    let heartbeats = Arc::new(HeartbeatRegistry::new());
    let deferrals = Arc::new(Mutex::new(DeferralTracker::default()));

    tokio::spawn(run_worker(queue, backoff_max, shutdown_rx, move |job: Job| {
        let state = state.clone();
        let heartbeats = heartbeats.clone();
        let deferrals = deferrals.clone();
        async move {
            let payload: ToolJobPayload = match serde_json::from_value(job.payload.clone()) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(?err, "tool worker: malformed job payload");
                    return JobOutcome::Fail;
                }
            };

            let skills: Vec<String> = state.dispatcher.innate.list_specs().into_iter().map(|s| s.name).collect();
            let (done_tx, done_rx) = watch::channel(false);
            let heartbeat_handle = tool_worker::spawn_heartbeat(heartbeats, job.id, done_rx);

            let outcome = tool_worker::run_tool_job(
                state.llm.as_ref(),
                state.dispatcher.as_ref(),
                &state.config.act,
                &payload,
                &skills,
                &state.tool_perf,
                || false,
            )
            .await;

            let _ = done_tx.send(true);
            let _ = heartbeat_handle.await;

            let topic_embedding = (state.embed)(&payload.topic).await.unwrap_or_default();
            let current_topic_embedding = {
                let by_topic = state.last_mode_by_topic.lock().await;
                if by_topic.contains_key(&payload.topic) { topic_embedding.clone() } else { Vec::new() }
            };
            let is_stale = tool_worker::should_suppress_followup(&topic_embedding, &current_topic_embedding);

            if let Some(message) = tool_worker::build_followup_message(&outcome) {
                let mut tracker = deferrals.lock().await;
                let decision = tool_worker::decide_delivery(is_stale, false, &mut tracker, payload.tool_cycle_id);
                state.notifications.push(payload.topic.clone(), message, decision).await;
            }

            JobOutcome::Success
        }
    }))
}
