//! Rule- and embedding-based classification feeding the mode router:
//! topic assignment (C10), intent/complexity/tool-need classification
//! (C11, no model call), and tool relevance scoring (C12).

pub mod intent;
pub mod topic;
pub mod tool_relevance;

pub use intent::{Complexity, IntentClassification, IntentType, Register, classify_intent};
pub use topic::{TopicClassification, TopicClassifier};
pub use tool_relevance::{ToolRelevanceResult, ToolRelevanceScorer, ToolSource};
