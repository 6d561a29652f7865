//! NOTHING — the default action when no other is eligible. Always
//! eligible at score 0, lowest priority, so it never beats a real
//! candidate on a tie (spec §4.12).

use crate::action::{Action, ActionResult};
use crate::context::DriftContext;
use crate::thought::Thought;

#[derive(Debug, Default)]
pub struct NothingAction;

impl Action for NothingAction {
    fn name(&self) -> &'static str {
        "NOTHING"
    }

    fn priority(&self) -> i8 {
        -1
    }

    fn should_execute(&mut self, _thought: &Thought, _ctx: &DriftContext<'_>) -> (f32, bool) {
        (0.0, true)
    }

    fn execute(&mut self, _thought: &Thought, _ctx: &mut DriftContext<'_>) -> ActionResult {
        ActionResult::nothing()
    }
}
