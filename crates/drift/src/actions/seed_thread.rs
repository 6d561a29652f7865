//! SEED_THREAD — plants a standing curiosity thread for a topic that has
//! come up repeatedly, with salience backed by either episodic or semantic
//! evidence. Grounded on `autonomous_actions/seed_thread_action.py`.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use cortex_memory::cosine_similarity;

use crate::action::{Action, ActionResult};
use crate::context::DriftContext;
use crate::thought::Thought;

const MIN_ACTIVATION: f32 = 0.6;
const EPISODIC_SIMILARITY_THRESHOLD: f32 = 0.55;
const SEMANTIC_MIN_STRENGTH: f32 = 0.5;
const MAX_ACTIVE_THREADS: usize = 3;
const SEED_COOLDOWN: Duration = Duration::from_secs(86_400);

pub struct SeedThreadAction {
    active_seed_topics: HashSet<String>,
    cooldown_until: Option<Instant>,
}

impl Default for SeedThreadAction {
    fn default() -> Self {
        Self { active_seed_topics: HashSet::new(), cooldown_until: None }
    }
}

impl SeedThreadAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_closed(&mut self, seed_topic: &str) {
        self.active_seed_topics.remove(seed_topic);
    }

    /// Episodic salience needs [`EPISODIC_MIN_MATCHES`] recent episodes
    /// similar enough to the thought; we only carry one grounding episode
    /// per thought here, so a single strong match stands in for that
    /// count. Semantic salience is the simpler alternate path: any
    /// sufficiently activated concept is enough on its own.
    fn check_salience(&self, thought: &Thought) -> bool {
        let episodic_ok = thought
            .embedding
            .as_ref()
            .zip(thought.grounding_episode.as_ref().and_then(|e| e.embedding.as_ref()))
            .map(|(emb, ep_emb)| cosine_similarity(emb, ep_emb) >= EPISODIC_SIMILARITY_THRESHOLD)
            .unwrap_or(false);

        let semantic_ok = thought.activated_concepts.iter().any(|c| c.activation_score >= SEMANTIC_MIN_STRENGTH);

        episodic_ok || semantic_ok
    }

    fn classify_type(&self, thought: &Thought) -> &'static str {
        if thought.activated_concepts.len() >= 2 { "learning" } else { "curiosity" }
    }
}

impl Action for SeedThreadAction {
    fn name(&self) -> &'static str {
        "SEED_THREAD"
    }

    fn priority(&self) -> i8 {
        6
    }

    fn should_execute(&mut self, thought: &Thought, _ctx: &DriftContext<'_>) -> (f32, bool) {
        if thought.thought_type != crate::thought::ThoughtType::Hypothesis {
            return (0.0, false);
        }
        if self.active_seed_topics.contains(&thought.seed_topic) {
            return (0.0, false);
        }
        if thought.activation_energy < MIN_ACTIVATION {
            return (0.0, false);
        }
        if self.cooldown_until.is_some_and(|until| Instant::now() < until) {
            return (0.0, false);
        }
        if self.active_seed_topics.len() >= MAX_ACTIVE_THREADS {
            return (0.0, false);
        }
        if !self.check_salience(thought) {
            return (0.0, false);
        }
        (thought.activation_energy * 0.8, true)
    }

    fn execute(&mut self, thought: &Thought, _ctx: &mut DriftContext<'_>) -> ActionResult {
        let thread_type = self.classify_type(thought);
        self.active_seed_topics.insert(thought.seed_topic.clone());
        self.cooldown_until = Some(Instant::now() + SEED_COOLDOWN);

        let title = if thread_type == "learning" {
            format!("Explore {} further", thought.seed_topic)
        } else {
            format!("Be more curious about {}", thought.seed_topic)
        };

        ActionResult::ok(
            "SEED_THREAD",
            serde_json::json!({
                "thread_type": thread_type,
                "seed_topic": thought.seed_topic,
                "title": title,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thought::{ActivatedConcept, ThoughtType};

    fn hypothesis(energy: f32) -> Thought {
        let mut t = Thought::new(ThoughtType::Hypothesis, "travel keeps coming up", energy, "travel", "travel");
        t.activated_concepts = vec![ActivatedConcept { name: "travel".into(), activation_score: 0.7 }];
        t
    }

    #[test]
    fn below_activation_threshold_is_ineligible() {
        use crate::engagement::EngagementTracker;
        let mut engagement = EngagementTracker::default();
        let mut action = SeedThreadAction::new();
        let (_, eligible) = action.should_execute(&hypothesis(0.4), &DriftContext::test_default(&mut engagement));
        assert!(!eligible);
    }

    #[test]
    fn active_thread_for_same_topic_blocks_dedup() {
        use crate::engagement::EngagementTracker;
        let mut engagement = EngagementTracker::default();
        let mut action = SeedThreadAction::new();
        let thought = hypothesis(0.8);
        let (_, eligible) = action.should_execute(&thought, &DriftContext::test_default(&mut engagement));
        assert!(eligible);
        action.execute(&thought, &mut DriftContext::test_default(&mut engagement));

        let (_, eligible_again) = action.should_execute(&thought, &DriftContext::test_default(&mut engagement));
        assert!(!eligible_again, "dedup gate should block a second thread on the same topic");
    }

    #[test]
    fn cooldown_blocks_back_to_back_seeds() {
        use crate::engagement::EngagementTracker;
        let mut engagement = EngagementTracker::default();
        let mut action = SeedThreadAction::new();
        action.execute(&hypothesis(0.8), &mut DriftContext::test_default(&mut engagement));
        let other_topic = {
            let mut t = hypothesis(0.9);
            t.seed_topic = "cooking".into();
            t
        };
        let (_, eligible) = action.should_execute(&other_topic, &DriftContext::test_default(&mut engagement));
        assert!(!eligible, "24h cooldown applies across topics");
    }
}
