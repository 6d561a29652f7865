//! Terminal-mode prompt assembly (spec §4.7): soul + identity + mode
//! contract, and the fixed fallback text guaranteeing non-empty output.

use cortex_router::Mode;

const SOUL_PROMPT: &str = "You are a thoughtful, candid personal assistant. You keep context across \
conversations, act on the user's behalf when asked, and never pad a reply with filler.";

fn mode_contract(mode: Mode) -> &'static str {
    match mode {
        Mode::Respond => "Answer the user's message directly, drawing on the supplied context.",
        Mode::Clarify => "Ask exactly one focused clarifying question before proceeding further.",
        Mode::Acknowledge => "Send a brief, warm acknowledgement. Do not attempt a full answer yet.",
        Mode::Ignore => "Stay silent. This mode should not normally reach a generation call.",
        Mode::Act => "Decide which actions to take to satisfy the user's request.",
    }
}

/// Fixed per-mode fallback, substituted when the LLM returns empty text
/// (spec §4.7: "Non-empty output is guaranteed").
pub fn fallback_text(mode: Mode) -> &'static str {
    match mode {
        Mode::Respond => "I'm here, though I don't have a solid answer to offer just yet.",
        Mode::Clarify => "Could you say a bit more about what you mean?",
        Mode::Acknowledge => "Got it.",
        Mode::Ignore => "",
        Mode::Act => "Working on it.",
    }
}

/// Assembles the system prompt for a terminal mode: soul, identity (the
/// voice mapper's top-salient-dimension lines), and the mode contract.
/// The ACT prompt is built separately by `cortex-act`, skipping identity
/// on purpose (spec §4.7: "an ACT prompt skips the identity part to keep
/// reasoning pure").
pub fn build_terminal_system_prompt(mode: Mode, topic: &str, context_block: &str, voice_lines: &[String]) -> String {
    let identity_block = if voice_lines.is_empty() {
        String::new()
    } else {
        format!("\nVoice notes: {}\n", voice_lines.join(" "))
    };

    format!(
        "{soul}\n{identity}\nMode: {mode:?}. {contract}\n\nTopic: {topic}\n\nContext:\n{context}",
        soul = SOUL_PROMPT,
        identity = identity_block,
        contract = mode_contract(mode),
        topic = topic,
        context = context_block,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_mode_fallback_is_empty() {
        assert_eq!(fallback_text(Mode::Ignore), "");
    }

    #[test]
    fn every_other_mode_has_nonempty_fallback() {
        for mode in [Mode::Respond, Mode::Clarify, Mode::Acknowledge, Mode::Act] {
            assert!(!fallback_text(mode).is_empty());
        }
    }

    #[test]
    fn prompt_includes_soul_and_topic() {
        let prompt = build_terminal_system_prompt(Mode::Respond, "travel", "no context yet", &[]);
        assert!(prompt.contains("thoughtful, candid personal assistant"));
        assert!(prompt.contains("travel"));
    }
}
