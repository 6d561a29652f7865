//! NURTURE — proactively checks in during early relationship phases
//! (surface/exploratory) to build rapport; self-disables once the
//! relationship has graduated past exploratory. Grounded on
//! `autonomous_actions/nurture_action.py`.

use chrono::{DateTime, Utc};

use crate::action::{Action, ActionResult};
use crate::context::DriftContext;
use crate::quiet_hours::is_quiet_hour;
use crate::spark::SparkPhase;
use crate::thought::Thought;

const MIN_IDLE_SURFACE_SECS: i64 = 21_600;
const MIN_IDLE_EXPLORATORY_SECS: i64 = 7_200;
const DAILY_COOLDOWN_SECS: i64 = 86_400;
const MAX_UNANSWERED: u32 = 3;
const BASE_SCORE: f32 = 0.35;

pub struct NurtureAction {
    unanswered_count: u32,
    paused: bool,
    last_sent_at: Option<DateTime<Utc>>,
    backoff_multiplier: u32,
}

impl Default for NurtureAction {
    fn default() -> Self {
        Self { unanswered_count: 0, paused: false, last_sent_at: None, backoff_multiplier: 1 }
    }
}

impl NurtureAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_reply_received(&mut self) {
        self.unanswered_count = 0;
        self.backoff_multiplier = 1;
    }

    fn min_idle_for(phase: SparkPhase) -> i64 {
        if phase == SparkPhase::Surface { MIN_IDLE_SURFACE_SECS } else { MIN_IDLE_EXPLORATORY_SECS }
    }
}

impl Action for NurtureAction {
    fn name(&self) -> &'static str {
        "NURTURE"
    }

    fn priority(&self) -> i8 {
        7
    }

    fn should_execute(&mut self, _thought: &Thought, ctx: &DriftContext<'_>) -> (f32, bool) {
        if !matches!(ctx.spark_phase, SparkPhase::Surface | SparkPhase::Exploratory) {
            return (0.0, false);
        }
        if is_quiet_hour(ctx.current_hour, ctx.quiet_hours_start, ctx.quiet_hours_end) {
            return (0.0, false);
        }
        let Some(last_interaction) = ctx.last_interaction_at else { return (0.0, false) };
        let idle_secs = (ctx.now - last_interaction).num_seconds();
        if idle_secs < Self::min_idle_for(ctx.spark_phase) {
            return (0.0, false);
        }
        let effective_cooldown = DAILY_COOLDOWN_SECS * self.backoff_multiplier as i64;
        if let Some(last_sent) = self.last_sent_at {
            if (ctx.now - last_sent).num_seconds() < effective_cooldown {
                return (0.0, false);
            }
        }
        if self.paused {
            return (0.0, false);
        }
        if self.unanswered_count >= MAX_UNANSWERED {
            return (0.0, false);
        }
        if ctx.episode_count == 0 {
            return (0.0, false);
        }
        (BASE_SCORE, true)
    }

    fn execute(&mut self, thought: &Thought, ctx: &mut DriftContext<'_>) -> ActionResult {
        self.last_sent_at = Some(ctx.now);
        self.unanswered_count += 1;
        if self.unanswered_count >= MAX_UNANSWERED {
            self.paused = true;
        }
        ActionResult::ok("NURTURE", serde_json::json!({ "seed_topic": thought.seed_topic }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::EngagementTracker;
    use crate::thought::ThoughtType;

    fn thought() -> Thought {
        Thought::new(ThoughtType::Reflection, "checking in", 0.5, "coffee", "mornings")
    }

    fn ctx_with<'a>(engagement: &'a mut EngagementTracker, phase: SparkPhase, idle_secs: i64) -> DriftContext<'a> {
        let now = Utc::now();
        DriftContext {
            now,
            current_hour: 14,
            spark_phase: phase,
            last_interaction_at: Some(now - chrono::Duration::seconds(idle_secs)),
            episode_count: 3,
            quiet_hours_start: 23,
            quiet_hours_end: 8,
            engagement,
        }
    }

    #[test]
    fn connected_phase_self_disables() {
        let mut engagement = EngagementTracker::default();
        let mut action = NurtureAction::new();
        let ctx = ctx_with(&mut engagement, SparkPhase::Connected, MIN_IDLE_EXPLORATORY_SECS + 10);
        let (_, eligible) = action.should_execute(&thought(), &ctx);
        assert!(!eligible);
    }

    #[test]
    fn surface_phase_needs_six_hours_idle() {
        let mut engagement = EngagementTracker::default();
        let mut action = NurtureAction::new();
        let too_soon = ctx_with(&mut engagement, SparkPhase::Surface, 3600);
        assert!(!action.should_execute(&thought(), &too_soon).1);

        let mut engagement2 = EngagementTracker::default();
        let long_enough = ctx_with(&mut engagement2, SparkPhase::Surface, MIN_IDLE_SURFACE_SECS + 1);
        assert!(action.should_execute(&thought(), &long_enough).1);
    }

    #[test]
    fn max_unanswered_pauses_future_nurtures() {
        let mut engagement = EngagementTracker::default();
        let mut action = NurtureAction::new();
        for _ in 0..MAX_UNANSWERED {
            let mut ctx = ctx_with(&mut engagement, SparkPhase::Exploratory, MIN_IDLE_EXPLORATORY_SECS + 10);
            ctx.now = ctx.now - chrono::Duration::days(2);
            action.execute(&thought(), &mut ctx);
        }
        let ctx = ctx_with(&mut engagement, SparkPhase::Exploratory, MIN_IDLE_EXPLORATORY_SECS + 10);
        let (_, eligible) = action.should_execute(&thought(), &ctx);
        assert!(!eligible);
    }
}
