//! C22 — idle consolidation scheduler: triggers the semantic-consolidation
//! worker (C19) once every named queue has drained and enough
//! unconsolidated episodes have accumulated (spec §4.2 table entry C22).
//!
//! Grounded on the teacher's `server/mod.rs` background-timer idiom: poll
//! on an interval, check a cheap readiness predicate, act if it holds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cortex_memory::EpisodicStore;
use cortex_queue::NamedQueue;
use tokio::sync::{Mutex, watch};
use tracing::info;

/// `true` only if every queue in `queues` is fully drained (no pending,
/// no in-progress job) — the "all queues drain" half of the gate.
pub async fn queues_drained(queues: &[Arc<NamedQueue>]) -> bool {
    for queue in queues {
        if !queue.is_drained().await {
            return false;
        }
    }
    true
}

/// The readiness predicate itself: both halves of the gate must hold.
pub fn should_trigger(all_queues_drained: bool, unconsolidated_episode_count: usize, min_episodes: usize) -> bool {
    all_queues_drained && unconsolidated_episode_count >= min_episodes
}

/// Every distinct topic with at least one unconsolidated episode — one
/// semantic-consolidation job is enqueued per topic, matching
/// `select_consolidation_batch`'s per-topic batch shape in `cortex-workers`.
pub fn topics_needing_consolidation(store: &EpisodicStore) -> Vec<String> {
    let mut topics: Vec<String> = store.unconsolidated().iter().map(|e| e.topic.clone()).collect();
    topics.sort();
    topics.dedup();
    topics
}

/// Polls on `poll_secs`, and whenever the gate holds, pushes one
/// semantic-consolidation job per topic with unconsolidated episodes.
/// Runs until `shutdown_rx` fires.
pub async fn run_idle_consolidation_loop(
    queues: Vec<Arc<NamedQueue>>,
    episodes: Arc<Mutex<EpisodicStore>>,
    semantic_queue: Arc<NamedQueue>,
    poll_secs: u64,
    min_episodes: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(poll_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let drained = queues_drained(&queues).await;
                let topics = {
                    let store = episodes.lock().await;
                    if should_trigger(drained, store.unconsolidated().len(), min_episodes) {
                        topics_needing_consolidation(&store)
                    } else {
                        Vec::new()
                    }
                };
                for topic in topics {
                    semantic_queue.push(serde_json::json!({ "topic": topic })).await;
                    info!(topic, "idle consolidation: enqueued semantic-consolidation job");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_ok() && *shutdown_rx.borrow() {
                    info!("idle consolidation scheduler shutting down");
                    return;
                }
            }
        }
    }
}

/// Per-topic unconsolidated counts, exposed for CLI/test introspection
/// without requiring the full async loop.
pub fn unconsolidated_counts_by_topic(store: &EpisodicStore) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for episode in store.unconsolidated() {
        *counts.entry(episode.topic.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_requires_both_drained_and_enough_episodes() {
        assert!(!should_trigger(false, 10, 5));
        assert!(!should_trigger(true, 2, 5));
        assert!(should_trigger(true, 5, 5));
    }

    #[tokio::test]
    async fn queues_drained_is_false_if_any_queue_has_pending() {
        let a = NamedQueue::new("a", Duration::from_secs(60));
        let b = NamedQueue::new("b", Duration::from_secs(60));
        b.push(serde_json::json!({})).await;
        assert!(!queues_drained(&[a, b]).await);
    }
}
