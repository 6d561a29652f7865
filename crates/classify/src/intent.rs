//! C11 — intent classifier: rule-based intent/complexity/tool-need
//! classification, no model call (spec §4.4 Phase C).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Question,
    Command,
    Statement,
    Cancel,
    SelfResolved,
    Greeting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    Casual,
    Neutral,
    Formal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent_type: IntentType,
    pub needs_tools: bool,
    pub complexity: Complexity,
    pub confidence: f32,
    pub register: Register,
    pub is_cancel: bool,
    pub is_self_resolved: bool,
    pub tool_hints: Vec<String>,
}

struct Patterns {
    cancel: Regex,
    self_resolved: Regex,
    tool_verbs: Vec<(&'static str, Regex)>,
    formal: Regex,
    casual: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        cancel: Regex::new(r"(?i)\b(cancel|never ?mind|forget it|stop that|don'?t bother)\b").unwrap(),
        self_resolved: Regex::new(r"(?i)\b(i (already|just) (did|found|fixed|handled|solved) (it|that)|got it sorted|figured it out|no longer need(ed)?)\b").unwrap(),
        tool_verbs: vec![
            ("calendar", Regex::new(r"(?i)\b(schedule|remind me|calendar|appointment)\b").unwrap()),
            ("web_search", Regex::new(r"(?i)\b(search|look up|google|find out)\b").unwrap()),
            ("file", Regex::new(r"(?i)\b(read|write|open|save) (the )?file\b").unwrap()),
            ("email", Regex::new(r"(?i)\b(email|draft (a |an )?message|send (a )?note)\b").unwrap()),
            ("shell", Regex::new(r"(?i)\b(run|execute) (a |the )?(command|script)\b").unwrap()),
        ],
        formal: Regex::new(r"(?i)\b(would you kindly|please could you|i would appreciate)\b").unwrap(),
        casual: Regex::new(r"(?i)\b(yo|hey|gonna|wanna|lol|sup)\b").unwrap(),
    })
}

/// Classifies a user message by rule, without any model call (spec §4.11
/// Design note: deterministic tool-need routing upstream of the LLM).
pub fn classify_intent(message: &str) -> IntentClassification {
    let p = patterns();
    let trimmed = message.trim();

    let is_cancel = p.cancel.is_match(trimmed);
    let is_self_resolved = p.self_resolved.is_match(trimmed);

    let tool_hints: Vec<String> = p
        .tool_verbs
        .iter()
        .filter(|(_, re)| re.is_match(trimmed))
        .map(|(name, _)| name.to_string())
        .collect();
    let needs_tools = !tool_hints.is_empty() && !is_cancel && !is_self_resolved;

    let is_question = trimmed.ends_with('?') || trimmed.to_lowercase().starts_with("what")
        || trimmed.to_lowercase().starts_with("how")
        || trimmed.to_lowercase().starts_with("why")
        || trimmed.to_lowercase().starts_with("can you")
        || trimmed.to_lowercase().starts_with("could you");
    let is_greeting = trimmed.split_whitespace().count() <= 3
        && ["hi", "hello", "hey", "yo", "sup"].iter().any(|g| trimmed.to_lowercase().contains(g));

    let intent_type = if is_cancel {
        IntentType::Cancel
    } else if is_self_resolved {
        IntentType::SelfResolved
    } else if is_greeting {
        IntentType::Greeting
    } else if needs_tools {
        IntentType::Command
    } else if is_question {
        IntentType::Question
    } else {
        IntentType::Statement
    };

    let word_count = trimmed.split_whitespace().count();
    let complexity = if word_count <= 6 {
        Complexity::Simple
    } else if word_count <= 25 {
        Complexity::Moderate
    } else {
        Complexity::Complex
    };

    let register = if p.formal.is_match(trimmed) {
        Register::Formal
    } else if p.casual.is_match(trimmed) {
        Register::Casual
    } else {
        Register::Neutral
    };

    let confidence = if is_cancel || is_self_resolved || needs_tools {
        0.85
    } else if is_question || is_greeting {
        0.7
    } else {
        0.55
    };

    IntentClassification { intent_type, needs_tools, complexity, confidence, register, is_cancel, is_self_resolved, tool_hints }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cancel_intent() {
        let result = classify_intent("actually never mind, cancel that");
        assert!(result.is_cancel);
        assert_eq!(result.intent_type, IntentType::Cancel);
    }

    #[test]
    fn detects_self_resolved_intent() {
        let result = classify_intent("I already fixed it myself, thanks");
        assert!(result.is_self_resolved);
    }

    #[test]
    fn detects_tool_need_from_verb() {
        let result = classify_intent("can you search the web for flight prices");
        assert!(result.needs_tools);
        assert!(result.tool_hints.contains(&"web_search".to_string()));
    }

    #[test]
    fn cancel_overrides_tool_need() {
        let result = classify_intent("never mind, don't search for that");
        assert!(!result.needs_tools);
    }

    #[test]
    fn short_greeting_has_simple_complexity() {
        let result = classify_intent("Hello");
        assert_eq!(result.complexity, Complexity::Simple);
        assert_eq!(result.intent_type, IntentType::Greeting);
    }
}
