//! Phase B retrieval: context warmth and the world-state seam (spec §4.4).

use cortex_core::ThreadId;
use cortex_memory::Gist;

/// Context warmth is the average of three sub-scores (spec §4.4 Phase B),
/// grounded on the original digest worker's `calculate_context_warmth`:
/// working-memory fill capped at 4 turns, real-gist count capped at 5,
/// and a binary world-state-is-nonempty score.
pub fn context_warmth(working_memory_depth: usize, real_gist_count: usize, world_state_nonempty: bool) -> f32 {
    let wm_score = (working_memory_depth as f32 / 4.0).min(1.0);
    let gist_score = (real_gist_count as f32 / 5.0).min(1.0);
    let world_score = if world_state_nonempty { 1.0 } else { 0.0 };
    (wm_score + gist_score + world_score) / 3.0
}

/// Seam for a world-state summary source. No crate in the workspace owns
/// "active steps" tracking yet, so this stays a trait the runtime wires a
/// real implementation into; [`NullWorldState`] is the default no-op.
pub trait WorldStateSource: Send + Sync {
    fn summary(&self, thread_id: ThreadId) -> String;
}

pub struct NullWorldState;

impl WorldStateSource for NullWorldState {
    fn summary(&self, _thread_id: ThreadId) -> String {
        "(new conversation)".to_string()
    }
}

/// A world-state summary counts as non-empty unless it's literally the
/// placeholder text `NullWorldState` returns.
pub fn world_state_nonempty(summary: &str) -> bool {
    !summary.trim().is_empty() && summary.trim() != "(new conversation)"
}

/// Renders the Phase B retrieval result into a prompt-ready context
/// block: gists, the per-topic last-exchange fallback, formatted facts,
/// and the world-state summary.
pub fn build_context_block(gists: &[Gist], last_exchange: Option<&str>, facts: &[String], world_summary: &str) -> String {
    let mut sections = Vec::new();

    if gists.is_empty() {
        if let Some(fallback) = last_exchange {
            sections.push(format!("Last exchange: {fallback}"));
        }
    } else {
        let lines: Vec<String> = gists.iter().map(|g| format!("- {}", g.content)).collect();
        sections.push(format!("Known so far:\n{}", lines.join("\n")));
    }

    if !facts.is_empty() {
        sections.push(format!("Facts:\n{}", facts.join("\n")));
    }

    sections.push(format!("World state: {world_summary}"));

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmth_is_average_of_three_subscores() {
        let warmth = context_warmth(4, 5, true);
        assert!((warmth - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cold_start_has_zero_warmth() {
        assert_eq!(context_warmth(0, 0, false), 0.0);
    }

    #[test]
    fn null_world_state_is_not_considered_nonempty() {
        assert!(!world_state_nonempty(&NullWorldState.summary(uuid::Uuid::new_v4())));
    }
}
