//! Kafka streaming engine binary
//!
//! `run` consumes every configured topic with logging handlers until the
//! process is asked to stop. `drain` discards everything pending on one
//! consumer topic, which is useful for manual topic resets.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use sc_kafka::broker::{BrokerClient, KafkaBroker};
use sc_kafka::consumer::{drain_topic, handler_fn};
use sc_kafka::events::{NotificationRequested, PostCreated, SubscriptionCreated};
use sc_kafka::{init_tracing, EngineConfig, LogFormat, Orchestrator};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sc-kafka")]
#[command(about = "Kafka streaming consumption and production engine", long_about = None)]
struct Cli {
    /// Directory holding an optional .env file
    #[arg(long, env = "KAFKA_CONFIG_PATH")]
    config_dir: Option<PathBuf>,

    /// Log output format (pretty or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume every configured topic until interrupted
    Run,
    /// Commit past every pending message of one consumer topic
    Drain {
        /// Topic to drain; must have a consumer group configured
        #[arg(long)]
        topic: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = EngineConfig::load(cli.config_dir.as_deref()).context("Failed to load configuration")?;
    let broker = KafkaBroker::new(config.broker.clone(), config.consumer.clone(), config.producer.clone());
    info!("Using brokers {}", config.broker.bootstrap_servers());

    match cli.command {
        Command::Run => run(broker, config).await,
        Command::Drain { topic } => drain(broker, config, &topic).await,
    }
}

async fn run(broker: KafkaBroker, config: EngineConfig) -> Result<()> {
    let orchestrator = Orchestrator::builder(broker, config.topics)
        .consume::<PostCreated, _>(handler_fn("log-posts", |post: PostCreated, _cancel: CancellationToken| async move {
            info!(id = %post.id, author = %post.author_id, "Post created");
            Ok::<(), anyhow::Error>(())
        }))
        .consume::<SubscriptionCreated, _>(handler_fn(
            "log-subscriptions",
            |sub: SubscriptionCreated, _cancel: CancellationToken| async move {
                info!(id = %sub.id, subscriber = %sub.subscriber_id, creator = %sub.creator_id, "Subscription created");
                Ok::<(), anyhow::Error>(())
            },
        ))
        .consume::<NotificationRequested, _>(handler_fn(
            "log-notifications",
            |note: NotificationRequested, _cancel: CancellationToken| async move {
                info!(id = %note.id, user = %note.user_id, kind = %note.kind, "Notification requested");
                Ok::<(), anyhow::Error>(())
            },
        ))
        .start()
        .await
        .context("Failed to start consumption")?;

    info!("Consuming {:?}", orchestrator.topics());
    let reports = orchestrator.run_until_shutdown(shutdown_signal()).await;

    let mut failed = 0;
    for report in &reports {
        match &report.result {
            Ok(stats) => info!(topic = %report.topic, ?stats, "Loop finished"),
            Err(e) => {
                failed += 1;
                error!(topic = %report.topic, error = %e, "Loop failed");
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} consumption loop(s) failed", failed, reports.len()));
    }
    Ok(())
}

async fn drain(broker: KafkaBroker, config: EngineConfig, topic: &str) -> Result<()> {
    let binding = config
        .topics
        .consumer_binding_for_topic(topic)
        .ok_or_else(|| anyhow!("reader for topic {} is not configured", topic))?;

    let mut reader = broker
        .reader(&binding.topic, &binding.group)
        .await
        .with_context(|| format!("Failed to join group {}", binding.group))?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    info!("Draining {} until interrupted", topic);
    let drained = drain_topic(&mut reader, &cancel).await?;
    info!("Drained {} message(s) from {}", drained, topic);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
