//! `fitplan progress` command: show where a user is in the funnel.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_core::progress::{self, ProgressTracker};
use fitplan_db::models::ProgressStep;

pub async fn run_progress(pool: &PgPool, user_id_str: &str) -> Result<()> {
    let user_id =
        Uuid::parse_str(user_id_str).with_context(|| format!("invalid user ID: {user_id_str}"))?;

    let progress = progress::get_progress(pool, user_id).await?;

    println!("User: {user_id}");
    println!("Current step: {}", progress.current_step);
    println!(
        "Updated: {}",
        progress.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    for step in ProgressStep::ALL {
        let marker = if progress.completed_steps.contains(step) {
            "[x]"
        } else if step == progress.current_step {
            "[>]"
        } else if ProgressTracker::can_access_step(&progress, step) {
            "[ ]"
        } else {
            " - "
        };
        println!("  {marker} {step}");
    }

    if let Some(goal) = progress.selected_goal_id {
        println!();
        println!("Selected goal: {goal}");
    }
    if let Some(payment) = progress.payment_id {
        println!("Payment: {payment}");
    }
    Ok(())
}
