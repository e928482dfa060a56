//! Saga orchestrator binary: wires production providers, runs the sweeper
//! and per-leg confirmation consumer loops, or dispatches an admin
//! subcommand.

use clap::Parser;
use futures::StreamExt;
use saga_core::domain::Leg;
use saga_orchestrator::admin::{self, Cli};
use saga_orchestrator::leg_adapter::LegAdapter;
use saga_orchestrator::{BroadcastNotificationHub, SagaConfig, SagaOrchestrator, SystemClock, UuidIdGenerator};
use saga_postgres::PostgresSagaStore;
use saga_redis::RedisCoordinationStore;
use saga_redpanda::RedpandaBrokerGateway;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = SagaConfig::from_env();

    let mut metrics_server = saga_runtime::metrics::MetricsServer::new(config.metrics_addr.parse()?);
    if let Err(e) = metrics_server.start() {
        tracing::warn!(error = %e, "metrics exporter not installed");
    }

    let durable = Arc::new(PostgresSagaStore::new(&config.database_url).await?);
    let coordination = Arc::new(RedisCoordinationStore::new(&config.redis_url).await?);
    let broker = Arc::new(RedpandaBrokerGateway::new(&config.kafka_brokers)?);
    let notifications = Arc::new(BroadcastNotificationHub::new(config.webhook_timeout_ms));

    let orchestrator = Arc::new(SagaOrchestrator::new(
        durable,
        coordination,
        broker.clone(),
        notifications,
        Arc::new(SystemClock),
        Arc::new(UuidIdGenerator),
        config.clone(),
    ));

    if let Some(command) = cli.command {
        return admin::dispatch(&orchestrator, command).await.map_err(anyhow::Error::msg);
    }

    let sweeper_handle = tokio::spawn(saga_orchestrator::sweeper::run(
        Arc::clone(&orchestrator),
        Duration::from_millis(
            u64::try_from(orchestrator.config.stuck_saga_threshold_ms / 6).unwrap_or(300_000),
        ),
    ));

    let mut consumer_handles = Vec::new();
    for leg in Leg::publish_order() {
        let orchestrator = Arc::clone(&orchestrator);
        let broker = broker.clone();
        consumer_handles.push(tokio::spawn(async move {
            run_leg_consumer(leg, &orchestrator, broker.as_ref()).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    sweeper_handle.abort();
    for handle in consumer_handles {
        handle.abort();
    }

    Ok(())
}

async fn run_leg_consumer(
    leg: Leg,
    orchestrator: &Arc<SagaOrchestrator>,
    broker: &dyn saga_core::broker::BrokerGateway,
) {
    let adapter = LegAdapter::new(
        leg,
        orchestrator.durable.clone(),
        orchestrator.coordination.clone(),
        orchestrator.notifications.clone(),
        orchestrator.aggregate_fn(),
    );

    loop {
        let mut stream = match broker.subscribe(&[leg.confirmed_topic()]).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(leg = %leg, error = %e, "subscribe failed, retrying in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        while let Some(message) = stream.next().await {
            match message {
                Ok(confirmation) => {
                    if let Err(e) = adapter.confirm_reservation(confirmation).await {
                        // Don't poll the stream again: the gateway only
                        // commits a message's offset once this loop asks
                        // for the next one, so breaking here leaves this
                        // one unacknowledged and it gets redelivered after
                        // resubscribing below.
                        tracing::error!(leg = %leg, error = %e, "confirmation handling failed, leaving unacknowledged");
                        break;
                    }
                }
                Err(e) => {
                    // Malformed messages aren't worth redelivering forever;
                    // log and let the loop continue so it still gets
                    // acknowledged.
                    tracing::error!(leg = %leg, error = %e, "malformed confirmation message");
                }
            }
        }

        tracing::warn!(leg = %leg, "confirmation stream ended, resubscribing");
    }
}
