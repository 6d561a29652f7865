//! REFLECT — internal enrichment of a drift thought via association
//! linking (spec §4.11). No user-facing output, unlike COMMUNICATE: the
//! thought is stored as an enriched gist and its grounding concepts get a
//! touch. Grounded on `autonomous_actions/reflect_action.py`.
//!
//! Two gates: relevance (activation floor, type bonus with repeat decay,
//! episode/concept similarity, novelty against recent reflections) and a
//! shared fatigue budget (REFLECT gets 40% of the drift engine's total).

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use cortex_memory::{cosine_similarity, Embedding};

use crate::action::{Action, ActionResult};
use crate::context::DriftContext;
use crate::thought::{Thought, ThoughtType};

const MIN_ACTIVATION_ENERGY: f32 = 0.35;
const TYPE_REPEAT_DECAY: f32 = 0.8;
const MIN_EPISODE_SIMILARITY: f32 = 0.3;
const MIN_CONCEPT_SIMILARITY: f32 = 0.35;
const NOVELTY_THRESHOLD: f32 = 0.75;
const MAX_RECENT_REFLECTIONS: usize = 10;
const FATIGUE_BUDGET_FRACTION: f32 = 0.4;

fn type_bonus(thought_type: ThoughtType) -> f32 {
    match thought_type {
        ThoughtType::Reflection => 1.3,
        ThoughtType::Hypothesis => 1.2,
        ThoughtType::Question => 0.9,
        ThoughtType::Event => 1.0,
    }
}

pub struct ReflectAction {
    last_type_by_topic: HashMap<String, ThoughtType>,
    recent_embeddings_by_topic: HashMap<String, VecDeque<Embedding>>,
    total_fatigue_budget: f32,
    fatigue_window: Duration,
    recent_activations: VecDeque<(std::time::Instant, f32)>,
}

impl ReflectAction {
    pub fn new(total_fatigue_budget: f32, fatigue_window: Duration) -> Self {
        Self {
            last_type_by_topic: HashMap::new(),
            recent_embeddings_by_topic: HashMap::new(),
            total_fatigue_budget,
            fatigue_window,
            recent_activations: VecDeque::new(),
        }
    }

    fn relevance_score(&self, thought: &Thought) -> Option<f32> {
        if thought.activation_energy < MIN_ACTIVATION_ENERGY {
            return None;
        }

        let bonus = type_bonus(thought.thought_type);
        let decay = if self.last_type_by_topic.get(&thought.seed_topic) == Some(&thought.thought_type) { TYPE_REPEAT_DECAY } else { 1.0 };

        let episode_relevance = thought
            .grounding_episode
            .as_ref()
            .and_then(|ep| ep.embedding.as_ref())
            .zip(thought.embedding.as_ref())
            .map(|(ep_emb, emb)| cosine_similarity(emb, ep_emb))
            .unwrap_or(0.0);

        let concept_relevance = if thought.activated_concepts.is_empty() {
            0.0
        } else {
            thought.activated_concepts.iter().map(|c| c.activation_score).sum::<f32>() / thought.activated_concepts.len() as f32
        };

        let max_relevance = episode_relevance.max(concept_relevance);
        if episode_relevance < MIN_EPISODE_SIMILARITY && concept_relevance < MIN_CONCEPT_SIMILARITY {
            return None;
        }

        if !self.is_novel(thought) {
            return None;
        }

        Some(thought.activation_energy * bonus * decay * max_relevance)
    }

    fn is_novel(&self, thought: &Thought) -> bool {
        let Some(embedding) = thought.embedding.as_ref() else { return true };
        let Some(recent) = self.recent_embeddings_by_topic.get(&thought.seed_topic) else { return true };
        let max_sim = recent.iter().map(|e| cosine_similarity(embedding, e)).fold(0.0f32, f32::max);
        max_sim < NOVELTY_THRESHOLD
    }

    fn fatigue_passes(&self, now: std::time::Instant) -> bool {
        let budget = self.total_fatigue_budget * FATIGUE_BUDGET_FRACTION;
        let total: f32 = self
            .recent_activations
            .iter()
            .filter(|(at, _)| now.duration_since(*at) <= self.fatigue_window)
            .map(|(_, energy)| *energy)
            .sum();
        total < budget
    }

    fn record_reflection(&mut self, thought: &Thought, now: std::time::Instant) {
        self.last_type_by_topic.insert(thought.seed_topic.clone(), thought.thought_type);
        if let Some(embedding) = thought.embedding.clone() {
            let bucket = self.recent_embeddings_by_topic.entry(thought.seed_topic.clone()).or_default();
            bucket.push_back(embedding);
            while bucket.len() > MAX_RECENT_REFLECTIONS {
                bucket.pop_front();
            }
        }
        self.recent_activations.push_back((now, thought.activation_energy));
    }
}

impl Action for ReflectAction {
    fn name(&self) -> &'static str {
        "REFLECT"
    }

    fn priority(&self) -> i8 {
        5
    }

    fn should_execute(&mut self, thought: &Thought, _ctx: &DriftContext<'_>) -> (f32, bool) {
        let Some(score) = self.relevance_score(thought) else { return (0.0, false) };
        if !self.fatigue_passes(std::time::Instant::now()) {
            return (0.0, false);
        }
        (score, true)
    }

    fn execute(&mut self, thought: &Thought, _ctx: &mut DriftContext<'_>) -> ActionResult {
        self.record_reflection(thought, std::time::Instant::now());
        ActionResult::ok(
            "REFLECT",
            serde_json::json!({
                "seed_topic": thought.seed_topic,
                "seed_concept": thought.seed_concept,
                "activation_energy": thought.activation_energy,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thought_with(energy: f32, embedding: Vec<f32>) -> Thought {
        let mut t = Thought::new(ThoughtType::Reflection, "a thought", energy, "coffee", "mornings");
        t.embedding = Some(embedding);
        t.activated_concepts = vec![crate::thought::ActivatedConcept { name: "coffee".into(), activation_score: 0.6 }];
        t
    }

    #[test]
    fn below_activation_floor_is_ineligible() {
        use crate::context::DriftContext;
        use crate::engagement::EngagementTracker;
        let mut engagement = EngagementTracker::default();
        let mut action = ReflectAction::new(2.5, Duration::from_secs(1800));
        let thought = thought_with(0.1, vec![1.0, 0.0]);
        let (_, eligible) = action.should_execute(&thought, &DriftContext::test_default(&mut engagement));
        assert!(!eligible);
    }

    #[test]
    fn repeated_near_identical_thought_is_not_novel() {
        use crate::context::DriftContext;
        use crate::engagement::EngagementTracker;
        let mut engagement = EngagementTracker::default();
        let mut action = ReflectAction::new(2.5, Duration::from_secs(1800));
        let thought = thought_with(0.9, vec![1.0, 0.0]);
        let (score, eligible) = action.should_execute(&thought, &DriftContext::test_default(&mut engagement));
        assert!(eligible && score > 0.0);
        action.execute(&thought, &mut DriftContext::test_default(&mut engagement));

        let again = thought_with(0.9, vec![1.0, 0.0]);
        let (_, eligible_again) = action.should_execute(&again, &DriftContext::test_default(&mut engagement));
        assert!(!eligible_again, "identical embedding should fail the novelty gate");
    }
}
