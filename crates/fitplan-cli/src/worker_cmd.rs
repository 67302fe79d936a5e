//! `fitplan worker` command: run a polling plan generation worker.

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use fitplan_core::assembler::{PlanAssembler, RuleBasedAssembler};
use fitplan_core::worker::{self, WorkerConfig};

/// Run a worker against the job table until Ctrl-C, then drain.
pub async fn run_worker(pool: &PgPool, config: WorkerConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nShutting down, waiting for in-flight generations...");
            signal_token.cancel();
        }
    });

    let assembler: Arc<dyn PlanAssembler> = Arc::new(RuleBasedAssembler);
    println!(
        "Worker started: assembler={}, concurrency={}, max_attempts={}, poll every {}s",
        assembler.name(),
        config.concurrency,
        config.max_attempts,
        config.poll_interval.as_secs(),
    );
    println!("Press Ctrl-C to stop.");

    let stats = worker::run_worker(pool.clone(), assembler, None, config, cancel).await?;

    println!();
    println!("Worker stopped.");
    println!(
        "  completed={} failed={} skipped={} cancelled={} errors={}",
        stats.completed, stats.failed, stats.skipped, stats.cancelled, stats.errors,
    );
    Ok(())
}
