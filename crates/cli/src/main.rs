//! Development harness for the cognitive core: feed it a message, inspect
//! the memory lattice, or force a background cycle on demand, all
//! in-process against one [`AppState`] — the HTTP/SSE transport the spec
//! places out of scope never enters this binary (spec §1, §6).

use std::path::PathBuf;

use anyhow::Result;
use chrono::{Timelike, Utc};
use clap::{Parser, Subcommand};
use cortex_config::AppConfig;
use cortex_core::{ChatRequest, MessageSource};
use cortex_runtime::{submit_message, Daemon, SubmitOutcome};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const DEFAULT_USER: &str = "local";
const DEFAULT_CHANNEL: &str = "cli";
const DEFAULT_PLATFORM: &str = "cortex-cli";

#[derive(Debug, Parser)]
#[command(name = "cortex", version, about = "Cognitive-core dev harness")]
struct Cli {
    /// Path to the TOML config file; falls back to defaults if absent.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Send a single message through the digest pipeline and print the response.
    Chat {
        /// The message text.
        text: String,
    },
    /// Read lines from stdin, one message per line, until EOF.
    Repl,
    /// Run the full daemon: queue workers + decay/drift/idle/expiry loops,
    /// reading messages from stdin until EOF or Ctrl-C.
    Start,
    /// Inspect store sizes across the memory lattice.
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Force one drift tick (C24) outside the normal timer.
    DriftTick,
    /// Force one decay cycle (C21) outside the normal timer.
    DecayTick {
        /// Hours elapsed since the previous cycle, for the decay math.
        #[arg(long, default_value_t = 1.0)]
        hours: f32,
    },
    /// Write a default config file to --config if one doesn't exist yet.
    InitConfig,
}

#[derive(Debug, Subcommand)]
enum MemoryCommands {
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::InitConfig)) {
        let path = PathBuf::from(&cli.config);
        if path.exists() {
            println!("{} already exists, leaving it alone", path.display());
        } else {
            AppConfig::default().save_to(&path)?;
            println!("wrote default config to {}", path.display());
        }
        return Ok(());
    }

    let config = AppConfig::load_from(&cli.config)?;
    let workspace_root = std::env::current_dir()?;
    let agent_data_dir = workspace_root.join(".cortex");
    std::fs::create_dir_all(&agent_data_dir)?;
    let brave_api_key = std::env::var("BRAVE_API_KEY").ok();

    let state = std::sync::Arc::new(cortex_runtime::AppState::build(config, workspace_root, agent_data_dir, brave_api_key).await?);

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Chat { text } => {
            print_outcome(send(&state, &text).await?);
        }
        Commands::Repl => {
            run_repl(&state).await?;
        }
        Commands::Start => {
            let handle = Daemon::spawn(state.clone());
            println!("cortex daemon running (queue workers + decay/drift/idle/expiry loops). Type a message, Ctrl-D to stop.");
            run_repl(&state).await?;
            handle.shutdown().await;
        }
        Commands::Memory { command: MemoryCommands::Stats } => {
            print_memory_stats(&state).await;
        }
        Commands::DriftTick => {
            force_drift_tick(&state).await;
        }
        Commands::DecayTick { hours } => {
            force_decay_cycle(&state, hours).await;
        }
        Commands::InitConfig => unreachable!("handled above"),
    }

    Ok(())
}

async fn send(state: &cortex_runtime::AppState, text: &str) -> Result<SubmitOutcome> {
    let request = ChatRequest { text: text.to_string(), source: MessageSource::Text, attachments: Vec::new(), request_id: Uuid::new_v4() };
    request.validate().map_err(anyhow::Error::msg)?;
    submit_message(state, DEFAULT_USER, DEFAULT_CHANNEL, DEFAULT_PLATFORM, &request).await
}

fn print_outcome(outcome: SubmitOutcome) {
    match outcome {
        SubmitOutcome::Progress { message } => println!("[in progress] {message}"),
        SubmitOutcome::FastPathAck { ack_text, tool_job_id, .. } => {
            println!("{ack_text}");
            println!("[tool job {tool_job_id} queued]");
        }
        SubmitOutcome::Generated { mode, response_text, .. } => {
            println!("[{mode:?}] {response_text}");
        }
    }
}

async fn run_repl(state: &cortex_runtime::AppState) -> Result<()> {
    use std::io::{self, BufRead, Write};

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "/quit" || trimmed == "/exit" {
            break;
        }
        match send(state, trimmed).await {
            Ok(outcome) => print_outcome(outcome),
            Err(err) => eprintln!("error: {err:#}"),
        }
    }
    Ok(())
}

async fn print_memory_stats(state: &cortex_runtime::AppState) {
    let threads = state.threads.lock().await.len();
    let episodes = state.episodes.lock().await.len();
    let semantic = state.semantic.lock().await.all().len();
    let traits = state.traits.lock().await.all().len();
    let notifications = state.notifications.catch_up().await.len();

    println!("── memory lattice ───────────────────────────");
    println!("  threads               : {threads}");
    println!("  episodes              : {episodes}");
    println!("  semantic concepts     : {semantic}");
    println!("  user traits           : {traits}");
    println!("  buffered notifications: {notifications}");
}

/// Builds a throwaway [`cortex_drift::DriftEngine`] and ambient fields
/// straight from `state`'s stores, then runs exactly one tick. A real
/// process keeps one `DriftEngine` alive across ticks (`cortex-runtime`'s
/// daemon does); this harness command is for inspecting a single tick in
/// isolation, so starting fresh each invocation is the right call here.
async fn force_drift_tick(state: &cortex_runtime::AppState) {
    use cortex_drift::{run_drift_tick, DriftContextFields, DriftEngine, DriftTickInputsOwned, SparkPhase};

    let mut engine = DriftEngine::default();
    let semantic = state.semantic.lock().await;
    let episodes = state.episodes.lock().await;
    let now = Utc::now();
    let fields = DriftContextFields {
        now,
        current_hour: now.hour() as u8,
        spark_phase: SparkPhase::FirstContact,
        last_interaction_at: *state.last_interaction_at.lock().await,
        episode_count: episodes.len(),
        quiet_hours_start: state.config.drift.quiet_hours_start,
        quiet_hours_end: state.config.drift.quiet_hours_end,
    };
    let inputs = DriftTickInputsOwned::default();
    let mut rng = rand::thread_rng();

    match run_drift_tick(&mut engine, &semantic, &episodes, &fields, &inputs.as_refs(), &state.outbound_bus, &mut rng) {
        Some(outcome) => {
            println!("thought_type={:?} seed_topic={} winner={}", outcome.thought_type, outcome.seed_topic, outcome.winner);
            println!("{:?}", outcome.result);
        }
        None => println!("no semantic concepts yet; nothing to drift over"),
    }
}

async fn force_decay_cycle(state: &cortex_runtime::AppState, hours: f32) {
    use cortex_decay::{run_decay_cycle, DecayCycleContext};

    let mut episodes = state.episodes.lock().await;
    let mut semantic = state.semantic.lock().await;
    let mut traits = state.traits.lock().await;
    let mut facts = state.facts.lock().await;
    let mut identity = state.identity.lock().await;

    let report = run_decay_cycle(
        DecayCycleContext { episodes: &mut episodes, semantic: &mut semantic, traits: &mut traits, facts: &mut facts, identity: &mut identity, config: &state.config.decay },
        Utc::now(),
        hours / 24.0,
    );

    println!("── decay cycle ──────────────────────────────");
    println!("  episodes seen         : {}", report.episodes_seen);
    println!("  semantic concepts seen: {}", report.semantic_concepts_seen);
    println!("  traits seen           : {}", report.traits_seen);
    println!("  traits remaining      : {}", report.traits_remaining);
}
