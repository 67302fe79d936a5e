//! Long-running worker loop.
//!
//! Jobs arrive two ways: ids pushed through an in-process
//! [`JobReceiver`](crate::queue::JobReceiver), and queued rows found by
//! polling. Both feed the same bounded pool. An id already in flight in
//! this process is not started twice; across processes the claim decides.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fitplan_db::queries::generations as db;

use super::{ProcessOutcome, WorkerConfig, process_generation};
use crate::assembler::PlanAssembler;
use crate::generation::maintenance;
use crate::queue::JobReceiver;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Counts of what a worker run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: u64,
    /// Jobs whose processing returned a database error.
    pub errors: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Completed => self.completed += 1,
            ProcessOutcome::Failed => self.failed += 1,
            ProcessOutcome::Skipped => self.skipped += 1,
            ProcessOutcome::Cancelled => self.cancelled += 1,
        }
    }

    /// Jobs that reached a result, errors excluded.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed + self.skipped + self.cancelled
    }
}

/// `None` when the job never started because the worker was shutting down.
type JobDone = (Uuid, Option<Result<ProcessOutcome>>);

/// Generation ids running in this process, keyed by the task running them
/// so a panicked or aborted task still releases its id.
#[derive(Debug, Default)]
struct InFlight {
    ids: HashSet<Uuid>,
    tasks: HashMap<task::Id, Uuid>,
}

impl InFlight {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn contains(&self, generation_id: &Uuid) -> bool {
        self.ids.contains(generation_id)
    }

    fn insert(&mut self, task_id: task::Id, generation_id: Uuid) {
        self.ids.insert(generation_id);
        self.tasks.insert(task_id, generation_id);
    }

    fn finish(&mut self, task_id: task::Id) -> Option<Uuid> {
        let generation_id = self.tasks.remove(&task_id)?;
        self.ids.remove(&generation_id);
        Some(generation_id)
    }
}

struct Spawner {
    pool: PgPool,
    assembler: Arc<dyn PlanAssembler>,
    semaphore: Arc<Semaphore>,
    config: Arc<WorkerConfig>,
    cancel: CancellationToken,
}

impl Spawner {
    /// Start `generation_id` unless it is already running here.
    fn spawn(&self, tasks: &mut JoinSet<JobDone>, in_flight: &mut InFlight, generation_id: Uuid) {
        if in_flight.contains(&generation_id) {
            return;
        }
        let handle = tasks.spawn(run_one(
            self.pool.clone(),
            Arc::clone(&self.assembler),
            Arc::clone(&self.semaphore),
            Arc::clone(&self.config),
            self.cancel.clone(),
            generation_id,
        ));
        in_flight.insert(handle.id(), generation_id);
    }
}

/// Run until `cancel` fires, then drain in-flight jobs.
///
/// On start, `processing` rows older than `config.stale_after` are failed
/// so they can be retried. Jobs still running when the drain deadline
/// passes are aborted and left `processing` for the next stale sweep.
pub async fn run_worker(
    pool: PgPool,
    assembler: Arc<dyn PlanAssembler>,
    mut receiver: Option<JobReceiver>,
    config: WorkerConfig,
    cancel: CancellationToken,
) -> Result<WorkerStats> {
    let recovered = maintenance::recover_stale_generations(&pool, config.stale_after).await?;
    if !recovered.is_empty() {
        tracing::warn!(count = recovered.len(), "failed stale plan generations on start");
    }

    let config = Arc::new(config);
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks: JoinSet<JobDone> = JoinSet::new();
    let mut in_flight = InFlight::default();
    let mut stats = WorkerStats::default();

    let mut poll = tokio::time::interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        assembler = assembler.name(),
        concurrency = config.concurrency,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "plan generation worker started"
    );

    let spawner = Spawner {
        pool: pool.clone(),
        assembler: Arc::clone(&assembler),
        semaphore: Arc::clone(&semaphore),
        config: Arc::clone(&config),
        cancel: cancel.clone(),
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                handle_done(joined, &mut in_flight, &mut stats);
            }

            delivered = next_delivery(&mut receiver), if receiver.is_some() => {
                match delivered {
                    Some(id) => spawner.spawn(&mut tasks, &mut in_flight, id),
                    None => {
                        tracing::info!("job channel closed, continuing with polling only");
                        receiver = None;
                    }
                }
            }

            _ = poll.tick() => {
                let free = semaphore.available_permits();
                if free == 0 {
                    continue;
                }
                let ids = match db::list_queued_ids(&pool, free as i64 + in_flight.len() as i64).await {
                    Ok(ids) => ids,
                    Err(e) => {
                        tracing::error!(error = %format!("{e:#}"), "failed to poll queued plan generations");
                        continue;
                    }
                };
                for id in ids {
                    spawner.spawn(&mut tasks, &mut in_flight, id);
                }
            }
        }
    }

    // Drain.
    tracing::info!(in_flight = tasks.len(), "worker cancelled, draining in-flight jobs");
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !tasks.is_empty() {
        match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
            Ok(Some(joined)) => handle_done(joined, &mut in_flight, &mut stats),
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(
                    remaining = tasks.len(),
                    "drain timeout expired, aborting remaining jobs"
                );
                tasks.shutdown().await;
                break;
            }
        }
    }

    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        skipped = stats.skipped,
        cancelled = stats.cancelled,
        errors = stats.errors,
        "plan generation worker stopped"
    );
    Ok(stats)
}

async fn next_delivery(receiver: &mut Option<JobReceiver>) -> Option<Uuid> {
    match receiver {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_one(
    pool: PgPool,
    assembler: Arc<dyn PlanAssembler>,
    semaphore: Arc<Semaphore>,
    config: Arc<WorkerConfig>,
    cancel: CancellationToken,
    generation_id: Uuid,
) -> JobDone {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return (generation_id, None),
        permit = semaphore.acquire_owned() => permit,
    };
    let Ok(_permit) = permit else {
        return (generation_id, None);
    };

    let outcome = process_generation(&pool, assembler.as_ref(), generation_id, &config).await;
    (generation_id, Some(outcome))
}

fn handle_done(
    joined: Result<(task::Id, JobDone), JoinError>,
    in_flight: &mut InFlight,
    stats: &mut WorkerStats,
) {
    let (generation_id, outcome) = match joined {
        Ok((task_id, done)) => {
            in_flight.finish(task_id);
            done
        }
        Err(e) => {
            let generation_id = in_flight.finish(e.id());
            tracing::error!(
                generation_id = ?generation_id,
                error = %e,
                "plan generation task panicked or was aborted"
            );
            stats.errors += 1;
            return;
        }
    };

    match outcome {
        None => {}
        Some(Ok(outcome)) => {
            tracing::debug!(generation_id = %generation_id, ?outcome, "plan generation processed");
            stats.record(outcome);
        }
        Some(Err(e)) => {
            tracing::error!(
                generation_id = %generation_id,
                error = %format!("{e:#}"),
                "plan generation processing errored"
            );
            stats.errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_record_outcomes() {
        let mut stats = WorkerStats::default();
        stats.record(ProcessOutcome::Completed);
        stats.record(ProcessOutcome::Completed);
        stats.record(ProcessOutcome::Failed);
        stats.record(ProcessOutcome::Skipped);
        stats.record(ProcessOutcome::Cancelled);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.processed(), 5);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn closed_receiver_yields_none() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let mut receiver = Some(rx);
        drop(tx);
        assert_eq!(next_delivery(&mut receiver).await, None);
    }

    async fn exploding() -> JobDone {
        panic!("task blew up")
    }

    #[tokio::test]
    async fn panicked_task_releases_its_id() {
        let generation_id = Uuid::new_v4();
        let mut tasks: JoinSet<JobDone> = JoinSet::new();
        let mut in_flight = InFlight::default();
        let mut stats = WorkerStats::default();

        let handle = tasks.spawn(exploding());
        in_flight.insert(handle.id(), generation_id);
        assert!(in_flight.contains(&generation_id));

        let joined = tasks.join_next_with_id().await.unwrap();
        assert!(joined.as_ref().is_err_and(JoinError::is_panic));
        handle_done(joined, &mut in_flight, &mut stats);

        assert!(!in_flight.contains(&generation_id));
        assert_eq!(in_flight.len(), 0);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn aborted_task_releases_its_id() {
        let generation_id = Uuid::new_v4();
        let mut tasks: JoinSet<JobDone> = JoinSet::new();
        let mut in_flight = InFlight::default();
        let mut stats = WorkerStats::default();

        let handle = tasks.spawn(std::future::pending::<JobDone>());
        in_flight.insert(handle.id(), generation_id);
        handle.abort();

        let joined = tasks.join_next_with_id().await.unwrap();
        assert!(joined.as_ref().is_err_and(JoinError::is_cancelled));
        handle_done(joined, &mut in_flight, &mut stats);

        assert!(!in_flight.contains(&generation_id));
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn finished_task_releases_its_id() {
        let generation_id = Uuid::new_v4();
        let mut tasks: JoinSet<JobDone> = JoinSet::new();
        let mut in_flight = InFlight::default();
        let mut stats = WorkerStats::default();

        let handle = tasks.spawn(async move { (generation_id, Some(Ok(ProcessOutcome::Failed))) });
        in_flight.insert(handle.id(), generation_id);

        let joined = tasks.join_next_with_id().await.unwrap();
        handle_done(joined, &mut in_flight, &mut stats);

        assert_eq!(in_flight.len(), 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.errors, 0);
    }
}
