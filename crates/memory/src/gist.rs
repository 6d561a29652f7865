//! C4 — gist store: TTL'd, deduplicated, per-type-capped conversational
//! gists per topic (spec §3 "Gist", §4.3 gist store policy, §8 invariants).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::jaccard_similarity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GistType {
    Fact,
    Intent,
    Preference,
    Emotion,
    Summary,
    ColdStart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gist {
    pub id: Uuid,
    pub content: String,
    pub gist_type: GistType,
    /// Confidence on a `[0, 10]` scale, per spec §3.
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl Gist {
    pub fn new(content: impl Into<String>, gist_type: GistType, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            gist_type,
            confidence: confidence.clamp(0.0, 10.0),
            created_at: Utc::now(),
        }
    }
}

struct TopicGists {
    gists: Vec<Gist>,
    expires_at: DateTime<Utc>,
    last_exchange: Option<String>,
}

/// Fixed identity/capability fragments injected once per new topic
/// (spec §4.3, glossary "Cold-start gists") — excluded from context warmth.
const COLD_START_TEXTS: [&str; 2] = [
    "I'm your personal assistant — I keep context across our conversations and can act on your behalf.",
    "I can remember preferences, facts, and follow up on things later if you'd like.",
];

pub struct GistStore {
    max_gists: usize,
    max_per_type: usize,
    jaccard_threshold: f32,
    min_confidence: f32,
    ttl: Duration,
    topics: HashMap<String, TopicGists>,
}

impl GistStore {
    pub fn new(max_gists: usize, max_per_type: usize, jaccard_threshold: f32, min_confidence: f32, ttl_secs: u64) -> Self {
        Self {
            max_gists,
            max_per_type,
            jaccard_threshold,
            min_confidence,
            ttl: Duration::seconds(ttl_secs as i64),
            topics: HashMap::new(),
        }
    }

    fn ensure_topic(&mut self, topic: &str) -> &mut TopicGists {
        self.topics.entry(topic.to_string()).or_insert_with(|| TopicGists {
            gists: Vec::new(),
            expires_at: Utc::now() + self.ttl,
            last_exchange: None,
        })
    }

    /// Writes a batch of gists under the ordered policy from spec §4.3.
    pub fn store_gists(&mut self, topic: &str, batch: Vec<Gist>) {
        let ttl = self.ttl;
        let min_confidence = self.min_confidence;
        let jaccard_threshold = self.jaccard_threshold;
        let max_per_type = self.max_per_type;
        let max_gists = self.max_gists;
        let entry = self.ensure_topic(topic);
        let topic_was_empty = entry.gists.is_empty();

        for incoming in batch {
            // (1) drop below minimum confidence unless the topic has no gists yet.
            if incoming.confidence < min_confidence && !topic_was_empty {
                continue;
            }
            // (2) dedup against the best Jaccard match.
            let best_match = entry
                .gists
                .iter()
                .enumerate()
                .map(|(i, g)| (i, jaccard_similarity(&g.content, &incoming.content)))
                .filter(|(_, sim)| *sim >= jaccard_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            match best_match {
                Some((idx, _)) => {
                    if incoming.confidence > entry.gists[idx].confidence {
                        entry.gists[idx] = incoming;
                    }
                    // else: skip, existing representative wins.
                }
                None => entry.gists.push(incoming),
            }
        }

        // (3) per type retain only the top-N by confidence.
        let mut by_type: HashMap<GistType, Vec<usize>> = HashMap::new();
        for (i, g) in entry.gists.iter().enumerate() {
            by_type.entry(g.gist_type).or_default().push(i);
        }
        let mut keep = vec![true; entry.gists.len()];
        for (_, mut idxs) in by_type {
            if idxs.len() > max_per_type {
                idxs.sort_by(|&a, &b| entry.gists[b].confidence.total_cmp(&entry.gists[a].confidence));
                for &i in idxs.iter().skip(max_per_type) {
                    keep[i] = false;
                }
            }
        }
        let mut kept: Vec<Gist> = entry
            .gists
            .drain(..)
            .zip(keep)
            .filter_map(|(g, k)| if k { Some(g) } else { None })
            .collect();

        // retain newest max_gists overall.
        kept.sort_by_key(|g| g.created_at);
        if kept.len() > max_gists {
            let drop = kept.len() - max_gists;
            kept.drain(0..drop);
        }
        entry.gists = kept;
        entry.expires_at = Utc::now() + ttl;
    }

    /// Injects cold-start gists exactly once, when the topic has none yet.
    pub fn inject_cold_start(&mut self, topic: &str) {
        let entry = self.ensure_topic(topic);
        if !entry.gists.is_empty() {
            return;
        }
        for text in COLD_START_TEXTS {
            entry.gists.push(Gist::new(text, GistType::ColdStart, 10.0));
        }
    }

    /// Reads the live gist set for a topic, refreshing its TTL.
    pub fn read(&mut self, topic: &str) -> Vec<Gist> {
        let ttl = self.ttl;
        if let Some(entry) = self.topics.get_mut(topic) {
            entry.expires_at = Utc::now() + ttl;
            entry.gists.clone()
        } else {
            Vec::new()
        }
    }

    /// Real (non cold-start) gist count — used by `context_warmth`.
    pub fn real_gist_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|e| e.gists.iter().filter(|g| g.gist_type != GistType::ColdStart).count())
            .unwrap_or(0)
    }

    pub fn set_last_exchange(&mut self, topic: &str, summary: impl Into<String>) {
        self.ensure_topic(topic).last_exchange = Some(summary.into());
    }

    pub fn last_exchange(&self, topic: &str) -> Option<&str> {
        self.topics.get(topic).and_then(|e| e.last_exchange.as_deref())
    }

    /// Drops topics whose TTL has lapsed. Called by the scheduler, not the
    /// decay engine (spec §4.10 does not list gists among decayed stores).
    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        self.topics.retain(|_, e| e.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_gists_per_topic_and_per_type() {
        let mut store = GistStore::new(8, 2, 0.7, 0.0, 86_400);
        let batch: Vec<Gist> = (0..5)
            .map(|i| Gist::new(format!("unrelated fact number {i} about something"), GistType::Fact, 5.0 + i as f32))
            .collect();
        store.store_gists("general", batch);
        let read = store.read("general");
        assert!(read.iter().filter(|g| g.gist_type == GistType::Fact).count() <= 2);
    }

    #[test]
    fn dedups_similar_gists_keeping_higher_confidence() {
        let mut store = GistStore::new(8, 2, 0.5, 0.0, 86_400);
        store.store_gists(
            "general",
            vec![
                Gist::new("the user likes dark roast coffee", GistType::Preference, 4.0),
                Gist::new("the user likes dark roast coffee a lot", GistType::Preference, 8.0),
            ],
        );
        let read = store.read("general");
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].confidence, 8.0);
    }

    #[test]
    fn cold_start_injected_once_and_excluded_from_real_count() {
        let mut store = GistStore::new(8, 2, 0.7, 0.0, 86_400);
        store.inject_cold_start("general");
        store.inject_cold_start("general");
        let read = store.read("general");
        assert_eq!(read.len(), 2);
        assert_eq!(store.real_gist_count("general"), 0);
    }

    #[test]
    fn low_confidence_dropped_unless_topic_empty() {
        let mut store = GistStore::new(8, 2, 0.7, 3.0, 86_400);
        store.store_gists("general", vec![Gist::new("weak first gist", GistType::Fact, 1.0)]);
        assert_eq!(store.read("general").len(), 1, "topic was empty, so it should be admitted");
        store.store_gists("general", vec![Gist::new("another weak gist entirely", GistType::Fact, 1.0)]);
        assert_eq!(store.read("general").len(), 1, "topic now non-empty, weak gist should be dropped");
    }
}
