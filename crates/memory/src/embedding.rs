//! Shared embedding-space helpers. Every store here is embedding-agnostic:
//! callers supply vectors from whatever embedding backend is wired in (the
//! LLM provider's embedding endpoint, a local model, ...) — this crate only
//! ever compares vectors it is handed.

use std::collections::HashSet;

pub type Embedding = Vec<f32>;

/// Cosine similarity of two embeddings. Returns 0.0 for a zero vector or a
/// dimension mismatch rather than panicking — callers treat a missing
/// embedding as "no similarity signal", not an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Word-level Jaccard similarity used for gist dedup and novelty checks
/// where no embedding is available (spec §3 Gist invariant, §4.11
/// COMMUNICATE novelty gate).
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let words_a: HashSet<String> = tokenize(a);
    let words_b: HashSet<String> = tokenize(b);
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_jaccard_one() {
        assert_eq!(jaccard_similarity("hello world", "hello world"), 1.0);
    }

    #[test]
    fn disjoint_text_has_jaccard_zero() {
        assert_eq!(jaccard_similarity("hello world", "goodbye moon"), 0.0);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_mismatched_dims_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
