//! C12 — tool relevance: embedding similarity between the user message and
//! tool/skill descriptions (spec §4.4 fast-path decision input).

use cortex_memory::{Embedding, cosine_similarity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    InnateSkill,
    ExternalTool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRelevanceResult {
    pub name: String,
    pub source: ToolSource,
    pub relevance: f32,
}

pub struct ToolRelevanceScorer {
    catalog: Vec<(String, ToolSource, Embedding)>,
}

impl Default for ToolRelevanceScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRelevanceScorer {
    pub fn new() -> Self {
        Self { catalog: Vec::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, source: ToolSource, description_embedding: Embedding) {
        self.catalog.push((name.into(), source, description_embedding));
    }

    /// Returns the top-K tools/skills by cosine similarity to the message
    /// embedding, descending. `max_relevance` is simply `results[0].relevance`.
    pub fn top_k(&self, message_embedding: &Embedding, k: usize) -> Vec<ToolRelevanceResult> {
        let mut scored: Vec<ToolRelevanceResult> = self
            .catalog
            .iter()
            .map(|(name, source, emb)| ToolRelevanceResult {
                name: name.clone(),
                source: *source,
                relevance: cosine_similarity(message_embedding, emb),
            })
            .collect();
        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        scored.truncate(k);
        scored
    }

    pub fn max_relevance(&self, message_embedding: &Embedding) -> f32 {
        self.top_k(message_embedding, 1).first().map(|r| r.relevance).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_is_sorted_descending() {
        let mut scorer = ToolRelevanceScorer::new();
        scorer.register("calendar", ToolSource::InnateSkill, vec![1.0, 0.0]);
        scorer.register("web_search", ToolSource::ExternalTool, vec![0.0, 1.0]);
        let results = scorer.top_k(&vec![0.9, 0.1], 2);
        assert_eq!(results[0].name, "calendar");
    }

    #[test]
    fn max_relevance_matches_top_result() {
        let mut scorer = ToolRelevanceScorer::new();
        scorer.register("calendar", ToolSource::InnateSkill, vec![1.0, 0.0]);
        assert!((scorer.max_relevance(&vec![1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
