//! `fitplan plan` commands: show, stats, feedback, modify and history.
//!
//! `show` goes through the same read path as the user-facing view, so the
//! first look at a ready plan completes the user's `plan_ready` step.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use fitplan_core::plans::{self, PlanOverview, PlanStatistics};
use fitplan_db::models::PlanVersion;
use fitplan_db::payload::WorkoutDay;

use crate::PlanCommands;

pub async fn run_plan_command(command: PlanCommands, pool: &PgPool) -> Result<()> {
    match command {
        PlanCommands::Show { user_id } => {
            let user_id = parse_user(&user_id)?;
            match plans::get_plan_overview(pool, user_id).await? {
                Some(overview) => print_overview(&overview),
                None => println!("User {user_id} has no generated plans yet."),
            }
        }
        PlanCommands::Stats { user_id } => {
            let user_id = parse_user(&user_id)?;
            match plans::plan_statistics(pool, user_id).await? {
                Some(stats) => print_statistics(&stats),
                None => println!("User {user_id} has no active plan."),
            }
        }
        PlanCommands::Feedback {
            user_id,
            rating,
            comment,
        } => {
            if rating.is_none() && comment.is_none() {
                anyhow::bail!("nothing to record: pass --rating and/or --comment");
            }
            let user_id = parse_user(&user_id)?;
            let summary =
                plans::submit_feedback(pool, user_id, rating, comment.as_deref()).await?;
            println!("Feedback recorded for plan summary {}.", summary.id);
        }
        PlanCommands::Modify {
            user_id,
            plan_type,
            request,
        } => {
            let user_id = parse_user(&user_id)?;
            let version = plans::request_modification(pool, user_id, plan_type, &request).await?;
            println!(
                "Modification request recorded as {} plan version {}.",
                version.plan_type, version.version_number
            );
        }
        PlanCommands::History { user_id, plan_type } => {
            let user_id = parse_user(&user_id)?;
            let versions = plans::plan_history(pool, user_id, plan_type).await?;
            if versions.is_empty() {
                println!("User {user_id} has no {plan_type} plan versions.");
            }
            for version in &versions {
                print_version(version);
            }
        }
    }
    Ok(())
}

fn parse_user(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("invalid user ID: {s}"))
}

fn print_statistics(stats: &PlanStatistics) {
    println!(
        "Plan created {} (started {}, {} days ago)",
        stats.plan_created.format("%Y-%m-%d %H:%M:%S UTC"),
        stats.start_date,
        stats.days_since_start
    );
    println!(
        "Diet:    {} | {} kcal/day | {} weeks",
        stats.diet.diet_type, stats.diet.daily_calories, stats.diet.duration_weeks
    );
    println!(
        "Workout: {} | {} sessions/week | {} weeks | {} exercises",
        stats.workout.difficulty,
        stats.workout.sessions_per_week,
        stats.workout.duration_weeks,
        stats.workout.total_exercises
    );
    match stats.feedback.rating {
        Some(rating) => println!("Rating:  {rating}/5"),
        None => println!("Rating:  none"),
    }
    println!(
        "Feedback: {}",
        if stats.feedback.has_feedback { "yes" } else { "no" }
    );
}

fn print_version(version: &PlanVersion) {
    let state = if version.is_current { "current" } else { "pending" };
    println!(
        "v{} {} ({state}) {}: {}",
        version.version_number,
        version.plan_type,
        version.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        version.modification_reason
    );
}

pub fn print_overview(overview: &PlanOverview) {
    let workout = &overview.workout;
    let diet = &overview.diet;

    println!("Workout: {} ({})", workout.name, workout.id);
    println!(
        "  {} | {} weeks | {} sessions/week",
        workout.difficulty_level, workout.duration_weeks, workout.sessions_per_week
    );
    if !workout.equipment_needed.is_empty() {
        println!("  equipment: {}", workout.equipment_needed.join(", "));
    }
    for (day, plan) in workout.schedule.days() {
        match plan {
            WorkoutDay::Training { focus, exercises } => {
                println!("  {:<9} {focus}: {}", day.to_string(), exercises.join(", "));
            }
            WorkoutDay::Rest => println!("  {:<9} rest", day.to_string()),
        }
    }
    println!();

    println!("Diet: {} ({})", diet.name, diet.id);
    println!(
        "  {} | {} kcal/day | {} weeks",
        diet.diet_type, diet.daily_calorie_target, diet.duration_weeks
    );
    println!(
        "  protein {}g, carbs {}g, fat {}g per day",
        overview.daily_macros.protein_g, overview.daily_macros.carbs_g, overview.daily_macros.fat_g
    );
    if let Some(first) = diet.meal_plan.days.first() {
        println!(
            "  {}: {}, {}, {} ({} kcal)",
            first.day,
            first.breakfast.name,
            first.lunch.name,
            first.dinner.name,
            first.total_calories()
        );
    }
    println!("  shopping list: {} items", diet.shopping_list.len());

    let summary = &overview.summary;
    println!();
    println!("Started: {}", summary.start_date);
    if let Some(rating) = summary.user_rating {
        println!("Rating: {rating}/5");
    }
    if !summary.user_feedback.is_empty() {
        println!("Feedback: {}", summary.user_feedback);
    }
}
