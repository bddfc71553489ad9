use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use reply_pilot::agent::{Agent, AgentDeps};
use reply_pilot::channels::{StdinSource, StdoutSender, TaggedContacts};
use reply_pilot::clock::SystemClock;
use reply_pilot::config::PilotConfig;
use reply_pilot::llm::{NullGenerator, StaticGenerator, TextGenerator};
use reply_pilot::pipeline::RulesEngine;
use reply_pilot::store::{KvStore, LibSqlKv};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (stderr, so stdout stays pure JSON lines)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // ── Configuration ───────────────────────────────────────────────────
    let config = match std::env::var("REPLY_PILOT_CONFIG") {
        Ok(path) => PilotConfig::from_json_file(Path::new(&path))
            .with_context(|| format!("loading config from {path}"))?
            .with_env_overrides(),
        Err(_) => PilotConfig::from_env(),
    };
    config.validate().context("invalid configuration")?;

    let rules = match std::env::var("REPLY_PILOT_RULES") {
        Ok(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading rules from {path}"))?;
            RulesEngine::from_json(&raw).with_context(|| format!("parsing rules in {path}"))?
        }
        Err(_) => RulesEngine::empty(),
    };

    // ── Store ───────────────────────────────────────────────────────────
    let db_path = std::env::var("REPLY_PILOT_DB_PATH")
        .unwrap_or_else(|_| "./data/reply-pilot.db".to_string());
    let kv: Arc<dyn KvStore> = Arc::new(
        LibSqlKv::new_local(Path::new(&db_path))
            .await
            .with_context(|| format!("opening store at {db_path}"))?,
    );

    let generator: Arc<dyn TextGenerator> = match std::env::var("REPLY_PILOT_STATIC_REPLY") {
        Ok(reply) if !reply.trim().is_empty() => Arc::new(StaticGenerator::new(reply)),
        _ => Arc::new(NullGenerator),
    };

    eprintln!("Reply Pilot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Store: {}", db_path);
    eprintln!("   Rules: {}", rules.len());
    eprintln!("   Generator: {}", generator.name());
    eprintln!(
        "   Follow-ups: {}",
        if config.follow_up.enabled { "on" } else { "off" }
    );
    eprintln!("   Reading JSON events from stdin.\n");

    // ── Agent ───────────────────────────────────────────────────────────
    let tagged = Arc::new(TaggedContacts::new());
    let deps = AgentDeps {
        kv,
        source: Arc::new(StdinSource::new(Arc::clone(&tagged))),
        sender: Arc::new(StdoutSender::new()),
        probe: tagged,
        generator,
        clock: Arc::new(SystemClock),
    };

    Agent::new(config, rules, deps).run().await?;
    Ok(())
}
