//! A drift thought (spec §4.11): the unit of content the drift tick
//! produces from spreading activation over the semantic/episodic lattice.
//! Every autonomous action's `should_execute`/`execute` takes one of these;
//! grounded on `autonomous_actions/base.py`'s `ThoughtContext` dataclass.

use cortex_memory::Embedding;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    Reflection,
    Question,
    Hypothesis,
    /// Event-bridge driven: `extra` carries the raw context-change payload.
    Event,
}

#[derive(Debug, Clone, Default)]
pub struct ActivatedConcept {
    pub name: String,
    pub activation_score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct GroundingEpisode {
    pub topic: String,
    pub embedding: Option<Embedding>,
}

#[derive(Debug, Clone)]
pub struct Thought {
    pub thought_type: ThoughtType,
    pub content: String,
    pub activation_energy: f32,
    pub seed_concept: String,
    pub seed_topic: String,
    pub embedding: Option<Embedding>,
    pub drift_gist_id: Option<uuid::Uuid>,
    pub drift_gist_ttl_secs: i64,
    pub grounding_episode: Option<GroundingEpisode>,
    pub activated_concepts: Vec<ActivatedConcept>,
}

impl Thought {
    pub fn new(thought_type: ThoughtType, content: impl Into<String>, activation_energy: f32, seed_concept: impl Into<String>, seed_topic: impl Into<String>) -> Self {
        Self {
            thought_type,
            content: content.into(),
            activation_energy,
            seed_concept: seed_concept.into(),
            seed_topic: seed_topic.into(),
            embedding: None,
            drift_gist_id: None,
            drift_gist_ttl_secs: 1800,
            grounding_episode: None,
            activated_concepts: Vec::new(),
        }
    }
}
