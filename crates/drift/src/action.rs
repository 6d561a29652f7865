//! C24 — the autonomous action registry interface. Grounded on
//! `autonomous_actions/base.py`'s `AutonomousAction` abstract base: every
//! action scores eligibility, executes, and optionally learns from the
//! outcome. The decision router (spec §4.12) picks the highest-scoring
//! eligible action, ties broken by priority.

use serde_json::Value as Json;

use crate::context::DriftContext;
use crate::thought::Thought;

#[derive(Debug, Clone)]
pub struct ActionResult {
    pub action_name: &'static str,
    pub success: bool,
    pub details: Json,
}

impl ActionResult {
    pub fn nothing() -> Self {
        Self { action_name: "NOTHING", success: true, details: Json::Null }
    }

    pub fn ok(action_name: &'static str, details: Json) -> Self {
        Self { action_name, success: true, details }
    }

    pub fn failed(action_name: &'static str, details: Json) -> Self {
        Self { action_name, success: false, details }
    }
}

/// An outcome fed back to an action after delivery (e.g. the user engaged,
/// ignored, or dismissed a message it produced) — optional; most actions
/// have nothing to learn from this and leave `on_outcome` a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Engaged,
    Acknowledged,
    Dismissed,
    Ignored,
}

pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher wins ties against other eligible actions at the same score.
    fn priority(&self) -> i8;

    /// `(score, eligible)` — eligible=false means gated off right now
    /// (timing, engagement, cooldown, ...); score is meaningless then.
    fn should_execute(&mut self, thought: &Thought, ctx: &DriftContext<'_>) -> (f32, bool);

    fn execute(&mut self, thought: &Thought, ctx: &mut DriftContext<'_>) -> ActionResult;

    fn on_outcome(&mut self, _result: &ActionResult, _outcome: Option<Outcome>) {}
}
