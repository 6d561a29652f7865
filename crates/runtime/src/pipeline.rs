//! Request-path entrypoint: wires one `DigestContext` per inbound
//! message and drives `cortex_digest::run_digest`, then records the
//! routing decision so the next call on this topic has a
//! `previous_mode` to anti-oscillate against (spec §4.4/§8).

use cortex_core::{ChatRequest, Exchange};
use cortex_digest::context::NullWorldState;
use cortex_digest::pipeline::{run_digest, DigestContext, DigestOutcome};
use cortex_router::Mode;

use crate::state::AppState;

/// What `submit_message` handed back to its caller, stripped of the
/// borrowed-context plumbing `DigestOutcome` carries internally.
#[derive(Debug)]
pub enum SubmitOutcome {
    Progress { message: String },
    FastPathAck { exchange: Exchange, ack_text: String, tool_job_id: uuid::Uuid },
    Generated { exchange: Exchange, mode: Mode, response_text: String },
}

/// Runs one message through the digest pipeline end to end: selects the
/// thread, locks every store the pipeline touches, and persists the
/// resulting mode as `previous_mode` for this topic's next turn.
pub async fn submit_message(state: &AppState, user: &str, channel: &str, platform: &str, request: &ChatRequest) -> anyhow::Result<SubmitOutcome> {
    let thread_id = state.exchanges.select_or_create_thread(user, channel, platform).await;

    let mut threads = state.threads.lock().await;
    let mut thread = threads.remove(&thread_id).expect("thread just selected or created");
    drop(threads);

    if let Some(embedding) = (state.embed)(&request.text).await {
        state.drift_history.record_user_message(embedding);
    }

    let mut working_memory = state.working_memory.lock().await;
    let mut gists = state.gists.lock().await;
    let facts = state.facts.lock().await;
    let mut topic_classifier = state.topic_classifier.lock().await;
    let mut cycles = state.cycles.lock().await;
    let mut reward_cache = state.reward_cache.lock().await;
    let world_state = NullWorldState;
    let proactive = state.proactive_feedback();
    let voice_lines = state.voice_lines().await;

    let previous_mode = {
        let by_topic = state.last_mode_by_topic.lock().await;
        by_topic.get(&thread.current_topic).copied()
    };

    let mut ctx = DigestContext {
        working_memory: &mut working_memory,
        gists: &mut gists,
        facts: &facts,
        topic_classifier: &mut topic_classifier,
        tool_relevance: &state.tool_relevance,
        router: &state.router,
        cycles: &mut cycles,
        reward_cache: &mut reward_cache,
        encode_bus: &state.encode_bus,
        world_state: &world_state,
        proactive: &proactive,
        llm: state.llm.as_ref(),
        dispatcher: &state.dispatcher,
        tool_queue: &state.tool_queue,
        digest_config: &state.config.digest,
        router_config: &state.config.router,
        act_config: &state.config.act,
        voice_lines: &voice_lines,
        embed: &state.embed,
        previous_mode,
    };

    let outcome = run_digest(&mut ctx, &mut thread, request).await?;
    *state.last_interaction_at.lock().await = Some(chrono::Utc::now());

    let topic_after = thread.current_topic.clone();
    let mut threads = state.threads.lock().await;
    threads.insert(thread_id, thread);
    drop(threads);

    let result = match outcome {
        DigestOutcome::Progress { message } => SubmitOutcome::Progress { message },
        DigestOutcome::FastPathAck { exchange, ack_text, tool_job_id } => {
            state.last_mode_by_topic.lock().await.insert(topic_after, Mode::Act);
            state.exchanges.register_completed(exchange.clone()).await;
            SubmitOutcome::FastPathAck { exchange, ack_text, tool_job_id }
        }
        DigestOutcome::Generated { exchange, mode, response_text, .. } => {
            state.last_mode_by_topic.lock().await.insert(topic_after, mode);
            state.exchanges.register_completed(exchange.clone()).await;
            SubmitOutcome::Generated { exchange, mode, response_text }
        }
    };

    Ok(result)
}
