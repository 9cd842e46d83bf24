//! Murmur agent entry point.
//!
//! Loads configuration, wires the platform client, drafting brain,
//! Telegram approval channel and SQLite store into the action workflow,
//! then runs the sweep loop until shutdown. Missing credentials disable
//! the features that need them instead of aborting startup.

use murmur_agent::{Brain, BotmadangClient, GeminiClient, MurmurAgent, SqliteStore, TelegramChannel};
use murmur_common::config::Config;
use murmur_common::logging::init_logging;
use murmur_core::{
    ActionWorkflow, ApprovalBroker, DecisionChannel, Generator, PendingActionGuard, Platform,
    RateLimiter, ResourceLimits, StateStore, WorkflowConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Buffer for inbound decision events between poller and broker.
const DECISION_QUEUE_DEPTH: usize = 32;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );
    info!(version = env!("CARGO_PKG_VERSION"), "Murmur agent starting");

    let db_path = config.data_dir().join("murmur.db");
    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open(&db_path)?);
    info!(path = %db_path.display(), "State store opened");

    let platform: Arc<dyn Platform> = Arc::new(BotmadangClient::new(
        config.platform.base_url.clone(),
        config.platform.api_key.clone(),
    )?);
    if config.platform.api_key.is_none() {
        warn!("Platform API key not set, writes will be rejected by the platform");
    }

    // One shared limiter carries the model-tier quotas and the platform
    // write spacing.
    let limiter = Arc::new(RateLimiter::new());
    for tier in &config.brain.tiers {
        limiter.register(
            tier.name.clone(),
            ResourceLimits::quota(tier.requests_per_minute, tier.requests_per_day),
        );
    }
    limiter.register(
        format!("{}.post", platform.name()),
        ResourceLimits::spacing(Duration::from_secs(config.platform.post_interval_secs)),
    );
    limiter.register(
        format!("{}.comment", platform.name()),
        ResourceLimits::spacing(Duration::from_secs(config.platform.comment_interval_secs)),
    );

    let brain = match &config.brain.api_key {
        Some(key) => {
            let generator: Arc<dyn Generator> =
                Arc::new(GeminiClient::new(config.brain.base_url.clone(), key.clone())?);
            let tiers = config.brain.tiers.iter().map(|t| t.name.clone()).collect();
            Some(Arc::new(Brain::new(generator, limiter.clone(), tiers)))
        }
        None => {
            warn!("Model API key not set, drafting disabled");
            None
        }
    };

    let guard = PendingActionGuard::new();
    let workflow = match (&config.telegram.bot_token, config.telegram.chat_id) {
        (Some(token), Some(chat_id)) => {
            let (events_tx, events_rx) = mpsc::channel(DECISION_QUEUE_DEPTH);
            let channel = Arc::new(TelegramChannel::new(token.clone(), chat_id, events_tx));
            channel.spawn_listener();

            let decision_channel: Arc<dyn DecisionChannel> = channel;
            let broker = ApprovalBroker::new(decision_channel);
            broker.spawn_listener(events_rx);

            Some(Arc::new(ActionWorkflow::new(
                guard.clone(),
                limiter.clone(),
                broker,
                store.clone(),
                WorkflowConfig {
                    max_posts_per_day: config.agent.max_posts_per_day,
                    max_comments_per_day: config.agent.max_comments_per_day,
                    max_regenerations: config.agent.max_regenerations,
                    decision_timeout: Duration::from_secs(config.agent.decision_timeout_secs),
                },
            )))
        }
        _ => {
            warn!("Telegram approval channel not configured, write actions disabled");
            None
        }
    };

    let agent = MurmurAgent::new(
        platform,
        store,
        brain,
        workflow,
        guard,
        config.agent.clone(),
    );
    agent.run().await?;

    info!("Murmur agent stopped");
    Ok(())
}
