//! Spec §6 provider contract: a narrow request/response shape that digest,
//! act, and the sleep workers call against instead of reaching into
//! `LlmRouter`'s fallback/streaming machinery directly. Keeping this as a
//! thin adapter over [`LlmRouter::chat_messages`] means callers don't need
//! to know about Ollama/OpenRouter model names or tool-call plumbing.

use crate::{ChatMessage, LlmRouter, Provider};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmFormat {
    Json,
    Text,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited, retry_after={retry_after:?}")]
    RateLimited { retry_after: Option<u64> },
    #[error("provider error: {0}")]
    Provider(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("rate limited, retry_after={retry_after:?}")]
pub struct RateLimitError {
    pub retry_after: Option<u64>,
}

/// spec §6: `send_message(system_prompt, user_message, format) -> {text,
/// tokens_in, tokens_out}`, surfacing `RateLimitError` on 429s. Every call
/// site downstream of digest/act/workers talks to this trait, not to a
/// concrete provider client.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn send_message(
        &self,
        system_prompt: &str,
        user_message: &str,
        format: LlmFormat,
    ) -> Result<LlmResponse, LlmError>;
}

fn approx_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

fn is_rate_limit(err: &anyhow::Error) -> Option<Option<u64>> {
    let message = err.to_string().to_lowercase();
    if message.contains("429") || message.contains("rate limit") || message.contains("too many requests") {
        Some(None)
    } else {
        None
    }
}

pub struct RoutedLlmProvider {
    pub router: LlmRouter,
    pub primary: Provider,
    pub ollama_model: String,
    pub openrouter_model: String,
}

impl RoutedLlmProvider {
    pub fn new(router: LlmRouter, primary: Provider, ollama_model: impl Into<String>, openrouter_model: impl Into<String>) -> Self {
        Self { router, primary, ollama_model: ollama_model.into(), openrouter_model: openrouter_model.into() }
    }
}

#[async_trait]
impl LlmProvider for RoutedLlmProvider {
    async fn send_message(
        &self,
        system_prompt: &str,
        user_message: &str,
        format: LlmFormat,
    ) -> Result<LlmResponse, LlmError> {
        let system_prompt = match format {
            LlmFormat::Json => format!("{system_prompt}\n\nRespond with JSON only, no prose."),
            LlmFormat::Text => system_prompt.to_string(),
        };
        let messages = [ChatMessage::system(system_prompt), ChatMessage::user(user_message)];

        let tokens_in: u32 = messages
            .iter()
            .filter_map(|m| m.content.as_deref())
            .map(approx_tokens)
            .sum();

        let response = self
            .router
            .chat_messages(self.primary, &self.ollama_model, &self.openrouter_model, &messages, None)
            .await
            .map_err(|err| match is_rate_limit(&err) {
                Some(retry_after) => LlmError::RateLimited { retry_after },
                None => LlmError::Provider(err),
            })?;

        let text = response.content.unwrap_or_default();
        let tokens_out = approx_tokens(&text);
        Ok(LlmResponse { text, tokens_in, tokens_out })
    }
}
