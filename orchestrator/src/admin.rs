//! Admin/recovery CLI: inspect and manually intervene in saga state
//! without going through the booking API.

use crate::orchestrator::SagaOrchestrator;
use crate::sweeper::republish_missing_legs;
use clap::{Parser, Subcommand};
use saga_core::domain::{Leg, SagaStatus};
use std::sync::Arc;

/// Saga orchestrator recovery tooling.
#[derive(Parser, Debug)]
#[command(name = "saga-orchestrator", about = "Multi-leg travel booking saga orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Admin subcommands. Absent entirely, the binary runs the long-lived
/// service (admission + aggregation + sweeper).
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List sagas that have been pending longer than the stuck threshold.
    Stuck,
    /// Show the full record for a `requestId`.
    Show {
        /// The saga's idempotency key.
        request_id: String,
    },
    /// Show per-user aggregate booking statistics.
    Stats {
        /// The user to aggregate stats for.
        user_id: String,
    },
    /// Re-run aggregation for a saga whose reservation ids are already
    /// complete but which never reached the join point, or re-publish
    /// whichever leg requests are still missing.
    Retry {
        /// The saga's idempotency key.
        request_id: String,
    },
}

/// Dispatch an admin subcommand, printing a human-readable result to
/// stdout. Returns an exit-worthy error message on failure.
pub async fn dispatch(orchestrator: &Arc<SagaOrchestrator>, command: Command) -> Result<(), String> {
    match command {
        Command::Stuck => {
            let threshold =
                orchestrator.clock.now().timestamp_millis() - orchestrator.config.stuck_saga_threshold_ms;
            let ids = orchestrator
                .coordination
                .list_pending_older_than(threshold)
                .await
                .map_err(|e| e.to_string())?;
            if ids.is_empty() {
                println!("no stuck sagas");
            }
            for id in ids {
                println!("{id}");
            }
            Ok(())
        }
        Command::Show { request_id } => {
            let record = orchestrator
                .durable
                .find_by_request_id(&request_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no saga record for {request_id}"))?;
            println!("{record:#?}");
            Ok(())
        }
        Command::Stats { user_id } => {
            let stats = orchestrator
                .durable
                .aggregate_stats_by_user(&user_id)
                .await
                .map_err(|e| e.to_string())?;
            println!("{stats:#?}");
            Ok(())
        }
        Command::Retry { request_id } => {
            let record = orchestrator
                .durable
                .find_by_request_id(&request_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no saga record for {request_id}"))?;
            if record.status != SagaStatus::Pending {
                return Err(format!("saga {request_id} is {}; only Pending sagas can be retried", record.status));
            }

            let missing: Vec<Leg> =
                Leg::publish_order().into_iter().filter(|leg| record.reservation_id(*leg).is_none()).collect();

            if missing.is_empty() {
                orchestrator.aggregate(&request_id).await.map_err(|e| e.to_string())?;
                println!("retried {request_id}: aggregated");
                return Ok(());
            }

            if !republish_missing_legs(orchestrator, &request_id, &record, &missing).await {
                return Err(format!("saga {request_id}: republish failed for {missing:?}"));
            }
            println!("retried {request_id}: republished {missing:?}");
            Ok(())
        }
    }
}
