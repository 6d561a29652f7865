//! C10 — topic classifier: embedding-nearest-neighbour topic assignment
//! with a "recent topic" bias to prevent thrash (spec §4.5).

use std::collections::HashMap;
use std::time::Instant;

use cortex_memory::{Embedding, cosine_similarity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicClassification {
    pub topic: String,
    pub confidence: f32,
    pub classification_time_ms: f64,
}

/// A small positive nudge applied to the similarity of `recent_topic`
/// against a candidate match, so near-ties stay on the current topic.
const RECENT_TOPIC_BIAS: f32 = 0.05;

pub struct TopicClassifier {
    similarity_threshold: f32,
    known_topics: HashMap<String, Embedding>,
}

impl TopicClassifier {
    pub fn new(similarity_threshold: f32) -> Self {
        Self { similarity_threshold, known_topics: HashMap::new() }
    }

    pub fn remember(&mut self, topic: impl Into<String>, embedding: Embedding) {
        self.known_topics.insert(topic.into(), embedding);
    }

    /// Classifies a message embedding against known topics. If nothing
    /// clears `similarity_threshold`, a fresh topic label is minted from
    /// the message text and remembered for next time.
    pub fn classify(&mut self, message: &str, embedding: &Embedding, recent_topic: Option<&str>) -> TopicClassification {
        let started = Instant::now();

        let mut best: Option<(String, f32)> = None;
        for (topic, topic_embedding) in &self.known_topics {
            let mut sim = cosine_similarity(embedding, topic_embedding);
            if Some(topic.as_str()) == recent_topic {
                sim += RECENT_TOPIC_BIAS;
            }
            if best.as_ref().map(|(_, best_sim)| sim > *best_sim).unwrap_or(true) {
                best = Some((topic.clone(), sim));
            }
        }

        let result = match best {
            Some((topic, sim)) if sim >= self.similarity_threshold => {
                TopicClassification { topic, confidence: sim.clamp(0.0, 1.0), classification_time_ms: 0.0 }
            }
            _ => {
                let new_topic = mint_topic_label(message);
                self.known_topics.insert(new_topic.clone(), embedding.clone());
                TopicClassification { topic: new_topic, confidence: 0.3, classification_time_ms: 0.0 }
            }
        };

        TopicClassification { classification_time_ms: started.elapsed().as_secs_f64() * 1000.0, ..result }
    }
}

/// Cold-start heuristic: short greetings mint "general"; anything else
/// takes its first few content words as a readable slug.
fn mint_topic_label(message: &str) -> String {
    let lowered = message.to_lowercase();
    let trimmed = lowered.trim();
    let greeting_like = trimmed.split_whitespace().count() <= 3
        && ["hi", "hello", "hey", "yo", "sup"].iter().any(|g| trimmed.contains(g));
    if greeting_like || trimmed.is_empty() {
        return "general".to_string();
    }
    let words: Vec<&str> = trimmed
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .take(3)
        .collect();
    if words.is_empty() {
        "general".to_string()
    } else {
        words.join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_hello_classifies_as_general_with_low_confidence() {
        let mut classifier = TopicClassifier::new(0.75);
        let result = classifier.classify("Hello", &vec![0.1, 0.2, 0.3], None);
        assert_eq!(result.topic, "general");
        assert!(result.confidence < 0.7);
    }

    #[test]
    fn recent_topic_bias_prevents_thrash_on_near_ties() {
        let mut classifier = TopicClassifier::new(0.5);
        classifier.remember("cooking", vec![1.0, 0.0]);
        classifier.remember("travel", vec![0.99, 0.01]);
        let result = classifier.classify("let's talk about trips", &vec![0.98, 0.02], Some("cooking"));
        assert_eq!(result.topic, "cooking");
    }

    #[test]
    fn below_threshold_mints_new_topic() {
        let mut classifier = TopicClassifier::new(0.9);
        classifier.remember("cooking", vec![1.0, 0.0]);
        let result = classifier.classify("quarterly tax filing deadline", &vec![0.0, 1.0], None);
        assert_ne!(result.topic, "cooking");
    }
}
