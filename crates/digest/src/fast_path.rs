//! Fast-path template acknowledgement (spec §4.4 Phase C): the text
//! delivered immediately, with no LLM call, when the digest pipeline
//! spawns background tool work instead of generating inline.

use cortex_classify::{IntentClassification, Register};

/// First handful of content words from the user's message, used to make
/// the acknowledgement read as specific rather than generic.
pub fn extract_topic_phrase(text: &str) -> String {
    text.split_whitespace().take(6).collect::<Vec<_>>().join(" ")
}

/// Chooses "reflective" phrasing when the top-ranked scorer is an innate
/// skill rather than an external tool (spec §4.4: "choosing 'reflective'
/// phrasing when the top scorer is an innate skill").
pub fn select_fast_path_ack(intent: &IntentClassification, is_reflective: bool, topic_phrase: &str) -> String {
    let verb = if is_reflective { "think that through" } else { "look into that" };
    let phrase = if topic_phrase.trim().is_empty() { "this".to_string() } else { topic_phrase.to_string() };

    match intent.register {
        Register::Formal => format!("Give me a moment to {verb} regarding {phrase}."),
        Register::Casual => format!("One sec, let me {verb}."),
        Register::Neutral => format!("Let me {verb}. I'll be right back on {phrase}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_classify::classify_intent;

    #[test]
    fn reflective_phrasing_differs_from_tool_phrasing() {
        let intent = classify_intent("can you search the web for flights");
        let reflective = select_fast_path_ack(&intent, true, "flights to rome");
        let tool = select_fast_path_ack(&intent, false, "flights to rome");
        assert_ne!(reflective, tool);
    }

    #[test]
    fn empty_phrase_falls_back_to_generic_referent() {
        let intent = classify_intent("please schedule that");
        let ack = select_fast_path_ack(&intent, false, "");
        assert!(ack.contains("this"));
    }

    #[test]
    fn extract_topic_phrase_caps_at_six_words() {
        let phrase = extract_topic_phrase("one two three four five six seven eight");
        assert_eq!(phrase.split_whitespace().count(), 6);
    }
}
