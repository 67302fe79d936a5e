mod cleanup_cmd;
mod config;
mod generation_cmd;
mod plan_cmd;
mod progress_cmd;
mod simulate_cmd;
mod worker_cmd;

use clap::{Parser, Subcommand};

use fitplan_db::config::DbConfig;
use fitplan_db::models::PlanType;
use fitplan_db::pool;

use config::FitplanConfig;

#[derive(Parser)]
#[command(name = "fitplan", about = "Fitness plan funnel: payments, plan generation and workers")]
struct Cli {
    /// Database URL (overrides FITPLAN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a fitplan config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the fitplan database (requires config file or env vars)
    DbInit,
    /// Run a plan generation worker until Ctrl-C
    Worker {
        /// Maximum concurrent generations (overrides worker.concurrency)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Assembly attempts per job (overrides worker.max_attempts)
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Base backoff between attempts in seconds
        #[arg(long)]
        base_delay_secs: Option<u64>,
        /// Per-attempt assembly timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Plan generation job management
    Generation {
        #[command(subcommand)]
        command: GenerationCommands,
    },
    /// Show a user's funnel progress
    Progress {
        /// User ID
        user_id: String,
    },
    /// Active plans, statistics, feedback and modification requests
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Fail stale processing jobs and delete old failed ones
    Cleanup {
        /// Delete failed jobs older than this many days
        #[arg(long, default_value_t = 7)]
        days: u64,
        /// Processing jobs untouched for this many minutes are failed
        #[arg(long, default_value_t = 30)]
        stale_minutes: u64,
    },
    /// Walk one demo user through the whole funnel with the mock gateway
    Simulate {
        /// Phone number for the demo user (random when omitted)
        #[arg(long)]
        phone: Option<String>,
        /// Goal name
        #[arg(long, default_value = "lose_weight")]
        goal: String,
    },
}

#[derive(Subcommand)]
pub enum GenerationCommands {
    /// Queue plan generation for a paid user with a completed questionnaire
    Enqueue {
        /// User ID
        user_id: String,
        /// Manual retries allowed after failure
        #[arg(
            long,
            allow_negative_numbers = true,
            default_value_t = fitplan_core::generation::dispatch::DEFAULT_MAX_RETRIES
        )]
        max_retries: i32,
    },
    /// Requeue a failed generation
    Retry {
        /// Generation ID
        generation_id: String,
    },
    /// Cancel a queued or processing generation
    Cancel {
        /// Generation ID
        generation_id: String,
    },
    /// Show one generation, or the user's latest with --user
    Status {
        /// Generation ID
        #[arg(required_unless_present = "user")]
        generation_id: Option<String>,
        /// Show the latest generation of this user instead
        #[arg(long, conflicts_with = "generation_id")]
        user: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Show a user's active workout and diet plans
    Show {
        /// User ID
        user_id: String,
    },
    /// Summarize a user's active plans
    Stats {
        /// User ID
        user_id: String,
    },
    /// Rate and/or comment on a user's active plans
    Feedback {
        /// User ID
        user_id: String,
        /// Rating from 1 to 5
        #[arg(long)]
        rating: Option<i32>,
        /// Free-text feedback
        #[arg(long)]
        comment: Option<String>,
    },
    /// Record a request to change the active workout or diet plan
    Modify {
        /// User ID
        user_id: String,
        /// Plan to change: workout or diet
        #[arg(long = "type")]
        plan_type: PlanType,
        /// What should change
        #[arg(long)]
        request: String,
    },
    /// List a user's plan versions, newest first
    History {
        /// User ID
        user_id: String,
        /// Plan type: workout or diet
        #[arg(long = "type", default_value = "diet")]
        plan_type: PlanType,
    },
}

/// Execute the `fitplan init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        worker: config::WorkerSection::default(),
        payment: config::PaymentSection::default(),
    };

    config::save_config_to(&path, &cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!(
        "  worker.concurrency = {}, worker.max_attempts = {}",
        cfg.worker.concurrency, cfg.worker.max_attempts
    );
    println!();
    println!("Next: run `fitplan db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `fitplan db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = FitplanConfig::resolve(cli_db_url)?;

    println!("Initializing fitplan database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    pool::run_migrations(&db_pool).await?;

    // 4. Print success with table counts.
    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("fitplan db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Worker {
            concurrency,
            max_attempts,
            base_delay_secs,
            timeout_secs,
        } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let mut section = resolved.worker.clone();
            if let Some(n) = concurrency {
                section.concurrency = n;
            }
            if let Some(n) = max_attempts {
                section.max_attempts = n;
            }
            if let Some(secs) = base_delay_secs {
                section.base_delay_secs = secs;
            }
            if let Some(secs) = timeout_secs {
                section.timeout_secs = secs;
            }
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = worker_cmd::run_worker(&db_pool, section.to_worker_config()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Generation { command } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = generation_cmd::run_generation_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Progress { user_id } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = progress_cmd::run_progress(&db_pool, &user_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Plan { command } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmd::run_plan_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cleanup {
            days,
            stale_minutes,
        } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = cleanup_cmd::run_cleanup(&db_pool, days, stale_minutes).await;
            db_pool.close().await;
            result?;
        }
        Commands::Simulate { phone, goal } => {
            let resolved = FitplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = simulate_cmd::run_simulate(
                &db_pool,
                &resolved,
                phone.as_deref(),
                &goal,
            )
            .await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that touch process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn worker_flags_parse() {
        let cli = Cli::try_parse_from([
            "fitplan",
            "worker",
            "--concurrency",
            "2",
            "--timeout-secs",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Worker {
                concurrency,
                timeout_secs,
                max_attempts,
                ..
            } => {
                assert_eq!(concurrency, Some(2));
                assert_eq!(timeout_secs, Some(30));
                assert_eq!(max_attempts, None);
            }
            _ => panic!("expected worker command"),
        }
    }

    #[test]
    fn generation_status_needs_id_or_user() {
        assert!(Cli::try_parse_from(["fitplan", "generation", "status"]).is_err());
        assert!(
            Cli::try_parse_from(["fitplan", "generation", "status", "--user", "abc"]).is_ok()
        );
    }

    #[test]
    fn cancel_help_names_cancellable_states() {
        let cli = Cli::command();
        let about = cli
            .find_subcommand("generation")
            .and_then(|generation| generation.find_subcommand("cancel"))
            .and_then(|cancel| cancel.get_about())
            .map(|about| about.to_string())
            .unwrap();
        assert_eq!(about, "Cancel a queued or processing generation");
    }

    #[test]
    fn negative_max_retries_reaches_enqueue() {
        let cli = Cli::try_parse_from([
            "fitplan",
            "generation",
            "enqueue",
            "some-user",
            "--max-retries",
            "-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Generation {
                command: GenerationCommands::Enqueue { max_retries, .. },
            } => assert_eq!(max_retries, -1),
            _ => panic!("expected generation enqueue"),
        }
    }

    #[test]
    fn plan_modify_parses_type() {
        let cli = Cli::try_parse_from([
            "fitplan",
            "plan",
            "modify",
            "some-user",
            "--type",
            "workout",
            "--request",
            "no running",
        ])
        .unwrap();
        match cli.command {
            Commands::Plan {
                command:
                    PlanCommands::Modify {
                        plan_type, request, ..
                    },
            } => {
                assert_eq!(plan_type, PlanType::Workout);
                assert_eq!(request, "no running");
            }
            _ => panic!("expected plan modify"),
        }
    }

    #[test]
    fn plan_type_is_validated() {
        assert!(
            Cli::try_parse_from([
                "fitplan", "plan", "modify", "u", "--type", "meal", "--request", "x",
            ])
            .is_err()
        );
        assert!(Cli::try_parse_from(["fitplan", "plan", "modify", "u", "--type", "diet"]).is_err());
    }

    #[test]
    fn plan_history_defaults_to_diet() {
        let cli = Cli::try_parse_from(["fitplan", "plan", "history", "u"]).unwrap();
        match cli.command {
            Commands::Plan {
                command: PlanCommands::History { plan_type, .. },
            } => assert_eq!(plan_type, PlanType::Diet),
            _ => panic!("expected plan history"),
        }
    }

    #[test]
    fn global_database_url_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fitplan",
            "progress",
            "some-user",
            "--database-url",
            "postgresql://h/db",
        ])
        .unwrap();
        assert_eq!(cli.database_url.as_deref(), Some("postgresql://h/db"));
    }
}
