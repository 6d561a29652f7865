//! `AppState`: the single-user bundle of every store and ambient service
//! the rest of this crate wires job handlers and the digest pipeline
//! against. One process owns exactly one of these (spec §1: single-user
//! scope), mirroring the shape `cortex_decay::DecayState` and
//! `cortex_drift::DriftState` already use for their own slice of the
//! lattice — `AppState` is simply the union of all of them plus the
//! request-path services.

use std::collections::HashMap;
use std::sync::Arc;

use cortex_classify::{ToolRelevanceScorer, ToolSource, TopicClassifier};
use cortex_config::AppConfig;
use cortex_core::{Thread, ThreadId};
use cortex_digest::cycles::CycleTracker;
use cortex_digest::proactive::NullProactiveFeedback;
use cortex_digest::reward::BehaviourRewardCache;
use cortex_events::{EncodeEventBus, OutboundBus};
use cortex_exec::ToolPerfTracker;
use cortex_llm::provider::RoutedLlmProvider;
use cortex_llm::{LlmProvider, LlmRouter, Provider};
use cortex_memory::{EpisodicStore, FactStore, GistStore, IdentityVectors, SemanticStore, TraitStore, WorkingMemoryStore};
use cortex_queue::NamedQueue;
use cortex_router::{ModeRouter, RouterWeights};
use cortex_tools::ToolDispatcher;
use tokio::sync::Mutex;

use crate::daemon::DriftHistory;
use crate::embed::make_ollama_embed_fn;
use crate::exchanges::ExchangeRegistry;
use crate::notifications::NotificationBuffer;

/// Shared embedding hook, same shape as `cortex_digest::pipeline::EmbedFn`
/// and `cortex_workers::EmbedFn` — constructed once here and handed to
/// both peer crates' call sites, since neither depends on the other.
pub type EmbedFn = Arc<dyn Fn(&str) -> futures::future::BoxFuture<'static, Option<cortex_memory::Embedding>> + Send + Sync>;

/// Voice-line activation thresholds fed to `IdentityVectors::voice_lines`
/// (spec §4.9/§11): a dimension surfaces in the prompt once it's drifted
/// a quarter of the way off-center in either direction.
const VOICE_HIGH_THRESHOLD: f32 = 0.75;
const VOICE_LOW_THRESHOLD: f32 = 0.25;

/// Every store and ambient service the cognitive core needs, for one
/// user, for the lifetime of one process. Request-path code borrows
/// through the `Mutex` guards one exchange at a time; background loops
/// hold the same `Arc<Mutex<_>>`s so there is exactly one copy of each
/// store, never a silently diverging snapshot.
pub struct AppState {
    pub config: AppConfig,

    pub threads: Arc<Mutex<HashMap<ThreadId, Thread>>>,
    pub exchanges: Arc<ExchangeRegistry>,

    pub working_memory: Arc<Mutex<WorkingMemoryStore>>,
    pub gists: Arc<Mutex<GistStore>>,
    pub facts: Arc<Mutex<FactStore>>,
    pub traits: Arc<Mutex<TraitStore>>,
    pub episodes: Arc<Mutex<EpisodicStore>>,
    pub semantic: Arc<Mutex<SemanticStore>>,
    pub identity: Arc<Mutex<IdentityVectors>>,

    pub topic_classifier: Arc<Mutex<TopicClassifier>>,
    pub tool_relevance: Arc<ToolRelevanceScorer>,
    pub router: Arc<ModeRouter>,
    pub cycles: Arc<Mutex<CycleTracker>>,
    pub reward_cache: Arc<Mutex<BehaviourRewardCache>>,

    pub encode_bus: EncodeEventBus,
    pub outbound_bus: OutboundBus,

    pub llm: Arc<dyn LlmProvider>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub tool_perf: Arc<ToolPerfTracker>,
    pub embed: EmbedFn,

    pub memory_chunker_queue: Arc<NamedQueue>,
    pub episodic_queue: Arc<NamedQueue>,
    pub semantic_queue: Arc<NamedQueue>,
    pub tool_queue: Arc<NamedQueue>,

    pub notifications: Arc<NotificationBuffer>,

    /// The mode the router landed on last, per topic — read by
    /// `submit_message` to feed `DigestContext::previous_mode`.
    pub last_mode_by_topic: Arc<Mutex<HashMap<String, cortex_router::Mode>>>,

    /// Wall-clock time of the most recent exchange across every thread,
    /// fed to the drift engine's `DriftContextFields::last_interaction_at`.
    pub last_interaction_at: Arc<Mutex<Option<chrono::DateTime<chrono::Utc>>>>,

    /// Recent user-message embeddings the drift loop's novelty check
    /// reads each tick — populated by `submit_message`.
    pub drift_history: Arc<DriftHistory>,
}

impl AppState {
    /// Builds the full lattice plus every ambient service from
    /// `config`, seeding the tool-relevance catalog with an embedding of
    /// each registered skill's description (spec §4.4 Phase C input).
    pub async fn build(config: AppConfig, workspace_root: std::path::PathBuf, agent_data_dir: std::path::PathBuf, brave_api_key: Option<String>) -> anyhow::Result<Self> {
        let embed = make_ollama_embed_fn(config.llm.ollama_base_url.clone(), config.llm.ollama_model.clone());

        let primary = if config.llm.provider.eq_ignore_ascii_case("openrouter") { Provider::OpenRouter } else { Provider::Ollama };
        let llm: Arc<dyn LlmProvider> =
            Arc::new(RoutedLlmProvider::new(LlmRouter::default(), primary, config.llm.ollama_model.clone(), config.llm.openrouter_model.clone()));

        let registry = cortex_exec::default_registry(workspace_root, agent_data_dir, brave_api_key);
        let mut dispatcher = ToolDispatcher::default();
        dispatcher.innate = registry;

        let mut tool_relevance = ToolRelevanceScorer::new();
        for spec in dispatcher.innate.list_specs() {
            let embedding = embed(&spec.description).await.unwrap_or_default();
            tool_relevance.register(spec.name, ToolSource::InnateSkill, embedding);
        }

        let router = ModeRouter::new(RouterWeights::default(), config.router.tie_break_delta);

        let memory = &config.memory;
        let threads = Arc::new(Mutex::new(HashMap::new()));
        let exchanges = Arc::new(ExchangeRegistry::new(threads.clone()));
        Ok(Self {
            threads,
            exchanges,

            working_memory: Arc::new(Mutex::new(WorkingMemoryStore::new(memory.max_turns))),
            gists: Arc::new(Mutex::new(GistStore::new(memory.max_gists, memory.max_per_type, memory.gist_jaccard_threshold, memory.min_gist_confidence, memory.gist_ttl_secs))),
            facts: Arc::new(Mutex::new(FactStore::new(memory.fact_ttl_secs))),
            traits: Arc::new(Mutex::new(TraitStore::new())),
            episodes: Arc::new(Mutex::new(EpisodicStore::new())),
            semantic: Arc::new(Mutex::new(SemanticStore::new())),
            identity: Arc::new(Mutex::new(IdentityVectors::default())),

            topic_classifier: Arc::new(Mutex::new(TopicClassifier::new(0.75))),
            tool_relevance: Arc::new(tool_relevance),
            router: Arc::new(router),
            cycles: Arc::new(Mutex::new(CycleTracker::new())),
            reward_cache: Arc::new(Mutex::new(BehaviourRewardCache::new())),

            encode_bus: EncodeEventBus::new(),
            outbound_bus: OutboundBus::new(),

            llm,
            dispatcher: Arc::new(dispatcher),
            tool_perf: Arc::new(ToolPerfTracker::default()),
            embed,

            memory_chunker_queue: NamedQueue::new("memory-chunker", std::time::Duration::from_secs(config.queue.default_timeout_secs)),
            episodic_queue: NamedQueue::new("episodic", std::time::Duration::from_secs(config.queue.default_timeout_secs)),
            semantic_queue: NamedQueue::new("semantic-consolidation", std::time::Duration::from_secs(config.queue.default_timeout_secs)),
            tool_queue: NamedQueue::new("tool", std::time::Duration::from_secs(config.queue.default_timeout_secs)),

            notifications: Arc::new(NotificationBuffer::new()),

            last_mode_by_topic: Arc::new(Mutex::new(HashMap::new())),
            last_interaction_at: Arc::new(Mutex::new(None)),
            drift_history: Arc::new(DriftHistory::new()),

            config,
        })
    }

    pub async fn voice_lines(&self) -> Vec<String> {
        self.identity.lock().await.voice_lines(VOICE_HIGH_THRESHOLD, VOICE_LOW_THRESHOLD)
    }

    pub fn proactive_feedback(&self) -> NullProactiveFeedback {
        NullProactiveFeedback
    }
}
