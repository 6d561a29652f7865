//! Ollama `/api/embeddings` adapter, producing the `EmbedFn` seam both
//! `cortex-digest` and `cortex-workers` depend on. Grounded on the
//! teacher's `OllamaClient` shape: one `reqwest::Client`, JSON body in,
//! JSON body out, failures swallowed into `None` rather than propagated —
//! every caller of `EmbedFn` already treats a missing embedding as
//! "fall back to an empty vector", not as an error.

use std::sync::Arc;
use std::time::Duration;

use cortex_memory::Embedding;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Embedding,
}

/// Builds an `Arc<dyn Fn(&str) -> BoxFuture<'static, Option<Embedding>> + ...>`
/// backed by a single shared `reqwest::Client`, matching the shape both
/// `cortex_digest::pipeline::EmbedFn` and `cortex_workers::EmbedFn` expect.
pub fn make_ollama_embed_fn(base_url: impl Into<String>, model: impl Into<String>) -> Arc<dyn Fn(&str) -> BoxFuture<'static, Option<Embedding>> + Send + Sync> {
    let base_url = base_url.into();
    let model = model.into();
    let client = reqwest::Client::builder().timeout(Duration::from_secs(15)).build().unwrap_or_default();

    Arc::new(move |text: &str| {
        let client = client.clone();
        let url = format!("{base_url}/api/embeddings");
        let model = model.clone();
        let prompt = text.to_string();
        Box::pin(async move {
            let body = serde_json::json!({ "model": model, "prompt": prompt });
            let response = match client.post(&url).json(&body).send().await {
                Ok(response) => response,
                Err(err) => {
                    warn!(?err, "embedding call failed");
                    return None;
                }
            };

            if !response.status().is_success() {
                warn!(status = %response.status(), "embedding call returned non-success status");
                return None;
            }

            match response.json::<EmbeddingResponse>().await {
                Ok(parsed) if !parsed.embedding.is_empty() => Some(parsed.embedding),
                Ok(_) => None,
                Err(err) => {
                    warn!(?err, "could not parse embedding response");
                    None
                }
            }
        })
    })
}
