//! `fitplan generation` commands: enqueue, retry, cancel and inspect jobs.
//!
//! Jobs created here are left for polling workers (`fitplan worker`).

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_core::GenerationError;
use fitplan_core::generation::dispatch;
use fitplan_core::queue::PollingQueue;
use fitplan_db::models::PlanGeneration;

use crate::GenerationCommands;

pub async fn run_generation_command(command: GenerationCommands, pool: &PgPool) -> Result<()> {
    match command {
        GenerationCommands::Enqueue {
            user_id,
            max_retries,
        } => {
            let user_id = parse_id(&user_id, "user")?;
            let job = dispatch::enqueue_generation(pool, &PollingQueue, user_id, max_retries)
                .await
                .map_err(rejection)?;
            println!("Generation {} queued.", job.id);
            print_job(&job);
        }
        GenerationCommands::Retry { generation_id } => {
            let id = parse_id(&generation_id, "generation")?;
            let job = dispatch::retry_generation(pool, &PollingQueue, id)
                .await
                .map_err(rejection)?;
            println!(
                "Generation {} requeued (retry {}/{}).",
                job.id, job.retry_count, job.max_retries
            );
        }
        GenerationCommands::Cancel { generation_id } => {
            let id = parse_id(&generation_id, "generation")?;
            let job = dispatch::cancel_generation(pool, id)
                .await
                .map_err(rejection)?;
            println!("Generation {} cancelled.", job.id);
        }
        GenerationCommands::Status {
            generation_id,
            user,
        } => {
            let job = match (generation_id, user) {
                (Some(id), _) => {
                    let id = parse_id(&id, "generation")?;
                    dispatch::get_job_status(pool, id).await.map_err(rejection)?
                }
                (None, Some(user)) => {
                    let user_id = parse_id(&user, "user")?;
                    match dispatch::latest_generation_for_user(pool, user_id)
                        .await
                        .map_err(rejection)?
                    {
                        Some(job) => job,
                        None => {
                            println!("User {user_id} has no plan generations.");
                            return Ok(());
                        }
                    }
                }
                (None, None) => anyhow::bail!("a generation ID or --user is required"),
            };
            print_job(&job);
        }
    }
    Ok(())
}

fn parse_id(s: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("invalid {what} ID: {s}"))
}

/// Attach the stable error code to caller-visible rejections.
fn rejection(err: GenerationError) -> anyhow::Error {
    match err {
        GenerationError::Other(e) => e,
        other => anyhow::anyhow!("{other} [{}]", other.code()),
    }
}

pub fn print_job(job: &PlanGeneration) {
    println!("Generation: {}", job.id);
    println!("  status:      {}", job.status);
    println!("  user:        {}", job.user_id);
    println!("  retries:     {}/{}", job.retry_count, job.max_retries);
    println!("  provider:    {} ({})", job.ai_provider, job.algorithm_version);
    if let Some(queued_at) = job.queued_at {
        println!("  queued:      {}", queued_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(started_at) = job.started_at {
        println!("  started:     {}", started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(completed_at) = job.completed_at {
        println!("  completed:   {}", completed_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(secs) = job.processing_time_seconds {
        println!("  took:        {secs:.2}s");
    }
    if let (Some(workout), Some(diet)) = (job.workout_plan_id, job.diet_plan_id) {
        println!("  plans:       workout {workout}, diet {diet}");
    }
    if !job.error_message.is_empty() {
        println!("  error:       {}", job.error_message);
    }
}
