//! PLAN — proposes a persistent task from a recurring, actionable drift
//! topic. Grounded on `autonomous_actions/plan_action.py`.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use cortex_memory::jaccard_similarity;

use crate::action::{Action, ActionResult};
use crate::context::DriftContext;
use crate::thought::{Thought, ThoughtType};

const MIN_ACTIVATION: f32 = 0.7;
const MIN_SIGNALS: usize = 2;
const MAX_ACTIVE_TASKS: usize = 5;
const COOLDOWN: Duration = Duration::from_secs(172_800);
const SIGNAL_WINDOW: Duration = Duration::from_secs(7 * 86_400);
const DUPLICATE_SIMILARITY: f32 = 0.6;

const ACTIONABLE_VERBS: &[&str] =
    &["research", "find", "compare", "learn", "build", "prepare", "compile", "analyze", "investigate", "explore"];

pub struct PlanAction {
    topic_signals: Vec<(String, Instant)>,
    active_task_contents: VecDeque<String>,
    closed_topics: HashSet<String>,
    cooldown_until: Option<Instant>,
}

impl Default for PlanAction {
    fn default() -> Self {
        Self { topic_signals: Vec::new(), active_task_contents: VecDeque::new(), closed_topics: HashSet::new(), cooldown_until: None }
    }
}

impl PlanAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_completed(&mut self, content: &str) {
        self.active_task_contents.retain(|c| c != content);
    }

    fn prune_signals(&mut self, now: Instant) {
        self.topic_signals.retain(|(_, at)| now.duration_since(*at) <= SIGNAL_WINDOW);
    }

    fn record_and_count_signal(&mut self, topic: &str, now: Instant) -> usize {
        self.topic_signals.push((topic.to_string(), now));
        self.prune_signals(now);
        self.topic_signals.iter().filter(|(t, _)| t == topic).count()
    }

    fn is_actionable(content: &str) -> bool {
        let lower = content.to_lowercase();
        ACTIONABLE_VERBS.iter().any(|verb| lower.contains(verb))
    }

    fn is_duplicate(&self, content: &str) -> bool {
        self.active_task_contents.iter().any(|existing| jaccard_similarity(existing, content) > DUPLICATE_SIMILARITY)
    }
}

impl Action for PlanAction {
    fn name(&self) -> &'static str {
        "PLAN"
    }

    fn priority(&self) -> i8 {
        7
    }

    fn should_execute(&mut self, thought: &Thought, _ctx: &DriftContext<'_>) -> (f32, bool) {
        if !matches!(thought.thought_type, ThoughtType::Hypothesis | ThoughtType::Question) {
            return (0.0, false);
        }
        if thought.activation_energy < MIN_ACTIVATION {
            return (0.0, false);
        }
        if thought.seed_topic.is_empty() || thought.seed_topic == "general" {
            return (0.0, false);
        }

        // Signal is recorded even when the gate ultimately rejects, mirroring
        // the teacher: persistence has to be earned across drift ticks.
        let now = Instant::now();
        let signal_count = self.record_and_count_signal(&thought.seed_topic, now);
        if signal_count < MIN_SIGNALS {
            return (0.0, false);
        }

        if !Self::is_actionable(&thought.content) {
            return (0.0, false);
        }
        if self.is_duplicate(&thought.content) {
            return (0.0, false);
        }
        if self.active_task_contents.len() >= MAX_ACTIVE_TASKS {
            return (0.0, false);
        }
        if self.cooldown_until.is_some_and(|until| now < until) {
            return (0.0, false);
        }

        (thought.activation_energy * 0.7, true)
    }

    fn execute(&mut self, thought: &Thought, _ctx: &mut DriftContext<'_>) -> ActionResult {
        self.active_task_contents.push_back(thought.content.clone());
        self.cooldown_until = Some(Instant::now() + COOLDOWN);
        ActionResult::ok(
            "PLAN",
            serde_json::json!({
                "seed_topic": thought.seed_topic,
                "task_content": thought.content,
                "priority": 7,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::EngagementTracker;

    fn hypothesis_ctx(engagement: &mut EngagementTracker) -> DriftContext<'_> {
        DriftContext::test_default(engagement)
    }

    fn hypothesis(topic: &str, content: &str) -> Thought {
        Thought::new(ThoughtType::Hypothesis, content, 0.8, "x", topic)
    }

    #[test]
    fn single_signal_is_not_enough_persistence() {
        let mut engagement = EngagementTracker::default();
        let mut action = PlanAction::new();
        let thought = hypothesis("travel", "research flights to lisbon");
        let ctx = hypothesis_ctx(&mut engagement);
        let (_, eligible) = action.should_execute(&thought, &ctx);
        assert!(!eligible, "first signal should only be recorded, not acted on");
    }

    #[test]
    fn second_signal_with_actionable_verb_is_eligible() {
        let mut engagement = EngagementTracker::default();
        let mut action = PlanAction::new();
        let thought = hypothesis("travel", "research flights to lisbon");
        action.should_execute(&thought, &hypothesis_ctx(&mut engagement));
        let (score, eligible) = action.should_execute(&thought, &hypothesis_ctx(&mut engagement));
        assert!(eligible);
        assert!(score > 0.0);
    }

    #[test]
    fn non_actionable_content_is_rejected() {
        let mut engagement = EngagementTracker::default();
        let mut action = PlanAction::new();
        let thought = hypothesis("travel", "thinking about lisbon again");
        action.should_execute(&thought, &hypothesis_ctx(&mut engagement));
        let (_, eligible) = action.should_execute(&thought, &hypothesis_ctx(&mut engagement));
        assert!(!eligible, "no actionable verb present");
    }
}
