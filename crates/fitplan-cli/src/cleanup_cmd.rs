//! `fitplan cleanup` command: generation table upkeep.

use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;

use fitplan_core::generation::maintenance;
use fitplan_db::queries::generations;

/// Fail stale `processing` jobs, then delete failed jobs older than `days`.
pub async fn run_cleanup(pool: &PgPool, days: u64, stale_minutes: u64) -> Result<()> {
    let stale = Duration::from_secs(stale_minutes * 60);
    let reset = maintenance::recover_stale_generations(pool, stale).await?;
    if reset.is_empty() {
        println!("No stale processing generations.");
    } else {
        println!(
            "Reset {} stale generation(s) to failed (older than {stale_minutes}m):",
            reset.len()
        );
        for id in &reset {
            println!("  {id}");
        }
    }

    let retention = Duration::from_secs(days * 24 * 60 * 60);
    let deleted = maintenance::cleanup_failed_generations(pool, retention).await?;
    println!("Deleted {deleted} failed generation(s) older than {days} day(s).");

    let counts = generations::status_counts(pool).await?;
    println!();
    println!("Generations: {} total", counts.total);
    println!(
        "  pending={} queued={} processing={} completed={} failed={} cancelled={}",
        counts.pending,
        counts.queued,
        counts.processing,
        counts.completed,
        counts.failed,
        counts.cancelled,
    );
    Ok(())
}
