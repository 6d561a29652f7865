//! C18 — episodic worker: turns a chunked exchange into an `Episode` row,
//! with an LLM-structured extraction and a heuristic fallback when the
//! extraction call fails (spec §4.9).

use std::time::Duration;

use cortex_core::ExchangeId;
use cortex_llm::{LlmError, LlmFormat, LlmProvider};
use cortex_memory::embedding::Embedding;
use cortex_memory::episode::{Durability, EpisodicStore};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

/// Hard ceiling on the episode-extraction LLM call.
pub const HARD_TIMEOUT_SECS: u64 = 60;

/// Minimum turns since the last episode before a new one is considered
/// (spec §4.9 readiness gate), combined with an idle-trigger OR.
pub fn is_ready_for_episode(turns_since_last_episode: u32, min_turns: u32, idle_secs: i64, idle_trigger_secs: i64) -> bool {
    turns_since_last_episode >= min_turns || idle_secs >= idle_trigger_secs
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeExtraction {
    pub intent: String,
    pub context: String,
    pub action: String,
    pub emotion: String,
    pub outcome: String,
    pub gist: String,
    pub salience: f32,
    #[serde(default)]
    pub open_loops: Vec<String>,
}

impl EpisodeExtraction {
    /// Used when the LLM call fails or times out — a degraded but non-empty
    /// episode beats losing the exchange entirely (spec §4.9: "episodic
    /// writes never block on the extraction call's success").
    fn heuristic_fallback(prompt_text: &str, response_text: &str) -> Self {
        Self {
            intent: "unclassified".to_string(),
            context: prompt_text.chars().take(200).collect(),
            action: "responded".to_string(),
            emotion: "neutral".to_string(),
            outcome: response_text.chars().take(200).collect(),
            gist: prompt_text.chars().take(120).collect(),
            salience: 3.0,
            open_loops: Vec::new(),
        }
    }
}

fn build_episode_system_prompt() -> &'static str {
    "You extract one episodic memory row from a conversational exchange. \
     Respond with JSON only: {\"intent\", \"context\", \"action\", \"emotion\", \
     \"outcome\", \"gist\", \"salience\" (1-10), \"open_loops\": [strings]}."
}

/// Runs the episode-extraction LLM call; on any failure (rate limit,
/// provider error, timeout, parse failure) falls back to a heuristic
/// extraction rather than dropping the exchange.
pub async fn extract_episode(llm: &dyn LlmProvider, prompt_text: &str, response_text: &str) -> EpisodeExtraction {
    let user_message = format!("User: {prompt_text}\nAssistant: {response_text}");
    let call = llm.send_message(build_episode_system_prompt(), &user_message, LlmFormat::Json);

    let response = match tokio::time::timeout(Duration::from_secs(HARD_TIMEOUT_SECS), call).await {
        Ok(Ok(response)) => response,
        Ok(Err(LlmError::RateLimited { retry_after })) => {
            warn!(?retry_after, "episodic worker: rate limited, using heuristic fallback");
            return EpisodeExtraction::heuristic_fallback(prompt_text, response_text);
        }
        Ok(Err(err)) => {
            warn!(?err, "episodic worker: LLM call failed, using heuristic fallback");
            return EpisodeExtraction::heuristic_fallback(prompt_text, response_text);
        }
        Err(_) => {
            warn!("episodic worker: hard timeout exceeded, using heuristic fallback");
            return EpisodeExtraction::heuristic_fallback(prompt_text, response_text);
        }
    };

    match serde_json::from_str::<EpisodeExtraction>(&response.text) {
        Ok(extraction) => extraction,
        Err(err) => {
            warn!(?err, "episodic worker: could not parse extraction, using heuristic fallback");
            EpisodeExtraction::heuristic_fallback(prompt_text, response_text)
        }
    }
}

/// Heuristic durability classification (spec §4.9): topics that read as
/// one-off tool invocations are `CronTool`, short exploratory topics (few
/// turns) are `Transient`, topics that have accumulated many turns are
/// `Evolving` (an ongoing thread worth tracking), everything else defaults
/// to `Stable`.
pub fn classify_durability(topic: &str, turn_count: u32) -> Durability {
    let lowered = topic.to_lowercase();
    if lowered.contains("reminder") || lowered.contains("calendar") || lowered.contains("cron") {
        Durability::CronTool
    } else if turn_count <= 2 {
        Durability::Transient
    } else if turn_count >= 10 {
        Durability::Evolving
    } else {
        Durability::Stable
    }
}

/// Writes the extracted episode into the store, returning its id.
#[allow(clippy::too_many_arguments)]
pub fn apply_episode_extraction(
    store: &mut EpisodicStore,
    topic: &str,
    exchange_id: ExchangeId,
    extraction: &EpisodeExtraction,
    embedding: Embedding,
    durability: Durability,
) -> Uuid {
    store.create(
        topic,
        exchange_id,
        extraction.intent.clone(),
        extraction.context.clone(),
        extraction.action.clone(),
        extraction.emotion.clone(),
        extraction.outcome.clone(),
        extraction.gist.clone(),
        extraction.salience,
        embedding,
        durability,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_gate_triggers_on_turn_count() {
        assert!(is_ready_for_episode(5, 5, 0, 600));
        assert!(!is_ready_for_episode(2, 5, 0, 600));
    }

    #[test]
    fn readiness_gate_triggers_on_idle() {
        assert!(is_ready_for_episode(1, 5, 700, 600));
    }

    #[test]
    fn durability_classifies_reminders_as_cron_tool() {
        assert_eq!(classify_durability("set a reminder for tomorrow", 1), Durability::CronTool);
    }

    #[test]
    fn durability_classifies_short_topics_as_transient() {
        assert_eq!(classify_durability("random trivia question", 1), Durability::Transient);
    }

    #[test]
    fn durability_classifies_long_topics_as_evolving() {
        assert_eq!(classify_durability("ongoing novel draft", 12), Durability::Evolving);
    }

    #[test]
    fn heuristic_fallback_is_non_empty() {
        let extraction = EpisodeExtraction::heuristic_fallback("what's the capital of France", "Paris");
        assert_eq!(extraction.salience, 3.0);
        assert!(!extraction.context.is_empty());
    }

    #[test]
    fn apply_episode_extraction_writes_a_row() {
        let mut store = EpisodicStore::new();
        let extraction = EpisodeExtraction {
            intent: "ask_fact".into(),
            context: "asked about capitals".into(),
            action: "answered".into(),
            emotion: "neutral".into(),
            outcome: "answered Paris".into(),
            gist: "capital of France".into(),
            salience: 4.0,
            open_loops: vec![],
        };
        let id = apply_episode_extraction(&mut store, "geography", Uuid::new_v4(), &extraction, vec![0.1, 0.2], Durability::Stable);
        assert!(store.peek(id).is_some());
    }
}
