//! Layered configuration for the cognitive core: one `#[serde(default)]`
//! struct per concern, loaded from a TOML file with environment overrides,
//! following the same shape the rest of the workspace's config crate used
//! in its previous incarnation.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub ollama_model: String,
    pub openrouter_model: String,
    pub ollama_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            openrouter_model: "openai/gpt-4o-mini".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            request_timeout_secs: 45,
        }
    }
}

/// Queue runtime (C1) defaults: per-queue timeout and backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub default_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 600,
            backoff_base_secs: 1,
            backoff_max_secs: 300,
        }
    }
}

/// Working memory, gist, and fact stores (C3–C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_turns: usize,
    pub max_gists: usize,
    pub max_per_type: usize,
    pub gist_jaccard_threshold: f32,
    pub min_gist_confidence: f32,
    pub min_fact_confidence: f32,
    pub gist_ttl_secs: u64,
    pub fact_ttl_secs: u64,
    pub forget_after_days: i64,
    pub forget_min_confidence: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_gists: 8,
            max_per_type: 2,
            gist_jaccard_threshold: 0.7,
            min_gist_confidence: 2.0,
            min_fact_confidence: 0.3,
            gist_ttl_secs: 86_400 * 3,
            fact_ttl_secs: 86_400 * 7,
            forget_after_days: 30,
            forget_min_confidence: 0.3,
        }
    }
}

/// Digest pipeline (C16) thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub fast_path_relevance_threshold: f32,
    pub fast_path_context_warmth_min: f32,
    pub in_flight_cosine_threshold: f32,
    pub inactivity_episode_trigger_secs: i64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            fast_path_relevance_threshold: 0.35,
            fast_path_context_warmth_min: 0.1,
            in_flight_cosine_threshold: 0.65,
            inactivity_episode_trigger_secs: 600,
        }
    }
}

/// Mode router (C13).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub tie_break_delta: f32,
    pub declining_reply_len_ratio: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tie_break_delta: 0.05,
            declining_reply_len_ratio: 0.5,
        }
    }
}

/// ACT loop (C14).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActConfig {
    pub max_iterations: u32,
    pub repetition_limit: u32,
    pub per_action_timeout_secs: u64,
    pub cumulative_timeout_secs: u64,
    pub fatigue_budget: f32,
    pub heartbeat_interval_secs: u64,
}

impl Default for ActConfig {
    fn default() -> Self {
        Self {
            max_iterations: 7,
            repetition_limit: 3,
            per_action_timeout_secs: 10,
            cumulative_timeout_secs: 60,
            fatigue_budget: 1.0,
            heartbeat_interval_secs: 10,
        }
    }
}

/// Decay engine (C21): exponential/linear decay rates and durability
/// multipliers, pinned from the original service's constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub interval_secs: u64,
    pub episodic_decay_rate: f32,
    pub semantic_decay_rate: f32,
    pub transient_multiplier: f32,
    pub evolving_multiplier: f32,
    pub cron_tool_multiplier: f32,
    pub external_ttl_divisor: f32,
    pub external_ttl_floor_secs: u64,
    pub trait_floor_days: i64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1800,
            episodic_decay_rate: 0.05,
            semantic_decay_rate: 0.03,
            transient_multiplier: 2.0,
            evolving_multiplier: 1.5,
            cron_tool_multiplier: 3.0,
            external_ttl_divisor: 1.5,
            external_ttl_floor_secs: 60,
            trait_floor_days: 7,
        }
    }
}

/// Idle consolidation (C22) and thread expiry (C23) schedulers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub idle_consolidation_min_episodes: usize,
    pub idle_poll_secs: u64,
    pub thread_expiry_idle_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_consolidation_min_episodes: 5,
            idle_poll_secs: 30,
            thread_expiry_idle_secs: 3600,
        }
    }
}

/// Drift / autonomous action engine (C24).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub tick_interval_secs: u64,
    pub quiet_hours_start: u8,
    pub quiet_hours_end: u8,
    pub timezone: String,
    pub circuit_breaker_window_hours: i64,
    pub circuit_breaker_pause_hours: i64,
    pub suppression_recovery_days: i64,
    pub max_active_threads: usize,
    pub max_active_tasks: usize,
    pub candidate_pool_cap: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 900,
            quiet_hours_start: 23,
            quiet_hours_end: 8,
            timezone: "UTC".to_string(),
            circuit_breaker_window_hours: 4,
            circuit_breaker_pause_hours: 8,
            suppression_recovery_days: 7,
            max_active_threads: 5,
            max_active_tasks: 10,
            candidate_pool_cap: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub approval_required: bool,
    pub allow_shell: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            approval_required: true,
            allow_shell: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub queue: QueueConfig,
    pub memory: MemoryConfig,
    pub digest: DigestConfig,
    pub router: RouterConfig,
    pub act: ActConfig,
    pub decay: DecayConfig,
    pub scheduler: SchedulerConfig,
    pub drift: DriftConfig,
    pub safety: SafetyConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("OLLAMA_BASE_URL") {
            if !value.is_empty() {
                config.llm.ollama_base_url = value;
                config.llm.provider = "ollama".to_string();
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn active_model(&self) -> &str {
        if self.llm.provider.eq_ignore_ascii_case("openrouter") {
            &self.llm.openrouter_model
        } else {
            &self.llm.ollama_model
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.decay.episodic_decay_rate, config.decay.episodic_decay_rate);
    }

    #[test]
    fn load_from_missing_path_falls_back_to_default() {
        let config = AppConfig::load_from("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config.llm.provider, "ollama");
    }

    #[test]
    fn active_model_switches_on_provider() {
        let mut config = AppConfig::default();
        config.llm.provider = "openrouter".to_string();
        assert_eq!(config.active_model(), "openai/gpt-4o-mini");
    }
}
