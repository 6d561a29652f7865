//! C19 — semantic consolidation worker: promotes a batch of unconsolidated
//! episodes on the same topic into durable `SemanticConcept`/relationship
//! rows (spec §4.10). Runs off the idle-consolidation scheduler (C22) or an
//! explicit enqueue from the episodic worker once a topic accumulates
//! enough unconsolidated episodes.

use std::time::Duration;

use cortex_llm::{LlmError, LlmFormat, LlmProvider};
use cortex_memory::embedding::Embedding;
use cortex_memory::episode::{Episode, EpisodicStore, SemanticConsolidationStatus};
use cortex_memory::semantic::SemanticStore;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

/// Hard ceiling on the consolidation LLM call — larger than the chunker's
/// since it reasons over a whole batch of episodes at once.
pub const HARD_TIMEOUT_SECS: u64 = 120;

fn default_strength() -> f32 {
    0.5
}

fn default_decay_resistance() -> f32 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConceptExtract {
    pub name: String,
    pub definition: String,
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default = "default_decay_resistance")]
    pub decay_resistance: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipExtract {
    pub from: String,
    pub to: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsolidationOutput {
    #[serde(default)]
    pub concepts: Vec<ConceptExtract>,
    #[serde(default)]
    pub relationships: Vec<RelationshipExtract>,
}

/// Selects every unconsolidated episode on `topic` — `EpisodicStore::unconsolidated`
/// already folds in None/Empty/Failed statuses (spec §4.10: a failed attempt
/// retries indefinitely, no backoff ceiling).
pub fn select_consolidation_batch<'a>(store: &'a EpisodicStore, topic: &str) -> Vec<&'a Episode> {
    store.unconsolidated().into_iter().filter(|e| e.topic == topic).collect()
}

fn build_consolidation_system_prompt() -> &'static str {
    "You consolidate a batch of episodic memories on one topic into durable \
     semantic knowledge. Respond with JSON only: {\"concepts\": [{\"name\", \
     \"definition\", \"strength\" (0.2-1.0), \"decay_resistance\" (0-1)}], \
     \"relationships\": [{\"from\", \"to\", \"kind\"}]}. Only extract concepts \
     that generalise beyond a single exchange."
}

fn render_episode(episode: &Episode) -> String {
    format!("- intent={} context={} outcome={} gist={}", episode.intent, episode.context, episode.outcome, episode.gist)
}

/// Runs the consolidation LLM call over a batch of episodes. Returns `None`
/// on any failure — the caller marks the batch `Failed` and it becomes
/// eligible for an unbounded retry on the next scheduler tick (spec §4.10).
pub async fn run_semantic_consolidation(llm: &dyn LlmProvider, topic: &str, episodes: &[&Episode]) -> Option<ConsolidationOutput> {
    let body = episodes.iter().map(|e| render_episode(e)).collect::<Vec<_>>().join("\n");
    let user_message = format!("Topic: {topic}\nEpisodes:\n{body}");

    let call = llm.send_message(build_consolidation_system_prompt(), &user_message, LlmFormat::Json);
    let response = match tokio::time::timeout(Duration::from_secs(HARD_TIMEOUT_SECS), call).await {
        Ok(Ok(response)) => response,
        Ok(Err(LlmError::RateLimited { retry_after })) => {
            warn!(?retry_after, "semantic consolidation: rate limited");
            return None;
        }
        Ok(Err(err)) => {
            warn!(?err, "semantic consolidation: LLM call failed");
            return None;
        }
        Err(_) => {
            warn!(timeout_secs = HARD_TIMEOUT_SECS, "semantic consolidation: hard timeout exceeded");
            return None;
        }
    };

    match serde_json::from_str::<ConsolidationOutput>(&response.text) {
        Ok(output) => Some(output),
        Err(err) => {
            warn!(?err, "semantic consolidation: could not parse output");
            None
        }
    }
}

/// Writes extracted concepts, pairing each by index with a caller-supplied
/// embedding (the worker embeds `concept.definition` upstream via the shared
/// `EmbedFn` hook, mirroring the digest pipeline's embedding seam).
pub fn apply_concepts(store: &mut SemanticStore, concepts: &[ConceptExtract], embeddings: &[Embedding]) {
    for (i, concept) in concepts.iter().enumerate() {
        let embedding = embeddings.get(i).cloned().unwrap_or_default();
        store.upsert(concept.name.clone(), concept.definition.clone(), concept.strength, concept.decay_resistance, embedding);
    }
}

pub fn apply_relationships(store: &mut SemanticStore, relationships: &[RelationshipExtract]) {
    for rel in relationships {
        store.link(rel.from.clone(), rel.to.clone(), rel.kind.clone());
    }
}

/// Marks every episode in the batch `Completed` on success or `Failed`
/// otherwise (spec §4.10).
pub fn mark_batch_consolidated(store: &mut EpisodicStore, episode_ids: &[Uuid], success: bool) {
    let status = if success { SemanticConsolidationStatus::Completed } else { SemanticConsolidationStatus::Failed };
    for id in episode_ids {
        store.mark_consolidation_status(*id, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::new_id;
    use cortex_memory::episode::Durability;

    #[test]
    fn select_consolidation_batch_filters_by_topic_and_status() {
        let mut store = EpisodicStore::new();
        let id = store.create("cooking", new_id(), "ask", "ctx", "act", "neutral", "done", "gist", 5.0, vec![], Durability::Stable);
        store.create("travel", new_id(), "ask", "ctx", "act", "neutral", "done", "gist", 5.0, vec![], Durability::Stable);
        store.mark_consolidation_status(id, SemanticConsolidationStatus::Completed);

        let batch = select_consolidation_batch(&store, "cooking");
        assert!(batch.is_empty(), "the one cooking episode was marked completed");

        let travel_batch = select_consolidation_batch(&store, "travel");
        assert_eq!(travel_batch.len(), 1);
    }

    #[test]
    fn apply_concepts_writes_into_store() {
        let mut store = SemanticStore::new();
        let concepts = vec![ConceptExtract { name: "sourdough".into(), definition: "a fermented bread".into(), strength: 0.6, decay_resistance: 0.5 }];
        apply_concepts(&mut store, &concepts, &[vec![0.1, 0.2]]);
        assert!(store.get("sourdough").is_some());
    }

    #[test]
    fn mark_batch_consolidated_sets_failed_on_failure() {
        let mut store = EpisodicStore::new();
        let id = store.create("cooking", new_id(), "ask", "ctx", "act", "neutral", "done", "gist", 5.0, vec![], Durability::Stable);
        mark_batch_consolidated(&mut store, &[id], false);
        let episode = store.peek(id).unwrap();
        assert_eq!(episode.semantic_consolidation_status, Some(SemanticConsolidationStatus::Failed));
    }
}
