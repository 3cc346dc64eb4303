//! Host binary: wires configuration, the pipeline, and the two periodic
//! schedulers together. CLI formatting beyond these two subcommands, and RPC
//! transport/registration, are out of scope for this crate (see `SPEC_FULL.md §1`).

use betterclaw_core::cli;
use betterclaw_core::config::AppConfig;
use betterclaw_core::context::ContextStore;
use betterclaw_core::delivery::{Delivery, ProcessDelivery};
use betterclaw_core::event_log::EventLog;
use betterclaw_core::judgment::{JudgmentLayer, Llm, NullLlm};
use betterclaw_core::patterns::PatternEngine;
use betterclaw_core::pipeline::{spawn_pipeline, Pipeline};
use betterclaw_core::proactive::ProactiveEngine;
use betterclaw_core::rules::RulesEngine;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "betterclaw-core", about = "Device-event triage and enrichment pipeline")]
struct Cli {
    /// Overrides the configured state directory (context.json, patterns.json, events.jsonl).
    #[arg(long, env = "BETTERCLAW_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Path to a betterclaw.toml override.
    #[arg(long, env = "BETTERCLAW_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the pipeline and its periodic schedulers until interrupted.
    Serve {
        #[arg(long, default_value = "agent")]
        delivery_binary: String,
        #[arg(long, default_value = "telegram")]
        channel: String,
    },
    /// Prints the `/bc` human-readable context summary and exits.
    Summary,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }

    init_tracing(&config.log_level);

    match cli.command {
        Command::Serve { delivery_binary, channel } => serve(config, delivery_binary, channel).await,
        Command::Summary => print_summary(config).await,
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn print_summary(config: AppConfig) -> anyhow::Result<()> {
    let context = ContextStore::new(config.context_path(), config.patterns_path());
    context.load().await;
    println!("{}", cli::summary(&context.get().await));
    Ok(())
}

async fn serve(config: AppConfig, delivery_binary: String, channel: String) -> anyhow::Result<()> {
    tracing::info!("starting betterclaw-core, state dir {:?}", config.state_dir);

    let context = ContextStore::new(config.context_path(), config.patterns_path());
    let event_log = EventLog::new(config.event_log_path());
    let rules = RulesEngine::new(config.push_budget_per_day);
    let judgment = JudgmentLayer::new(config.llm_model.clone(), config.push_budget_per_day);
    let delivery: Arc<dyn Delivery> = Arc::new(ProcessDelivery::new(delivery_binary));
    let llm: Arc<dyn Llm> = Arc::new(NullLlm);

    let pipeline = Pipeline::new(context.clone(), rules, judgment, event_log.clone(), delivery.clone(), llm, channel.clone());
    let (_handle, pipeline_task) = spawn_pipeline(pipeline, 256);

    let pattern_engine = Arc::new(PatternEngine::new(context.clone(), event_log, config.pattern_window_days));
    let pattern_task = pattern_engine.spawn();

    let proactive_task = if config.proactive_enabled {
        let proactive_engine = Arc::new(ProactiveEngine::new(context, delivery, channel));
        Some(proactive_engine.spawn())
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    pipeline_task.abort();
    pattern_task.abort();
    if let Some(task) = proactive_task {
        task.abort();
    }

    Ok(())
}
