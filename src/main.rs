//! cadence - a hot-reloading cron scheduler for agent slash commands.
//!
//! Usage:
//!   cadence run <CONFIG>       Run the scheduler and the status API
//!   cadence validate <CONFIG>  Validate the schedule file without running
//!   cadence jobs <CONFIG>      List the jobs in the schedule file

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use cadence::api::{start_server, ApiConfig};
use cadence::{
    load_schedule_config, DirectoryCommandRegistry, LogRecorder, OverlapPolicy,
    ProcessCommandExecutor, Scheduler, VaultLock,
};

/// cadence - a cron scheduler for agent slash commands
#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler with the given schedule file
    Run {
        /// Path to the schedule YAML file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Directory of command definition files
        #[arg(long, value_name = "DIR")]
        commands_dir: PathBuf,

        /// Agent runner binary used to execute commands
        #[arg(long, value_name = "BIN", default_value = "agent-runner")]
        agent_bin: PathBuf,

        /// Host for the status API
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port for the status API
        #[arg(long, default_value = "8765")]
        port: u16,

        /// Scheduler tick interval in seconds
        #[arg(long, default_value = "30")]
        tick_interval: u64,
    },

    /// Validate the schedule file without running
    Validate {
        /// Path to the schedule YAML file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List the jobs in the schedule file
    Jobs {
        /// Path to the schedule YAML file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            commands_dir,
            agent_bin,
            host,
            port,
            tick_interval,
        } => {
            run_scheduler(config, commands_dir, agent_bin, host, port, tick_interval).await?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Jobs { config } => {
            list_jobs(config)?;
        }
    }

    Ok(())
}

/// Run the scheduler and the status API until interrupted.
async fn run_scheduler(
    config: PathBuf,
    commands_dir: PathBuf,
    agent_bin: PathBuf,
    host: String,
    port: u16,
    tick_interval: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Schedule file: {}", config.display());
    info!("Commands directory: {}", commands_dir.display());

    let executor = Arc::new(ProcessCommandExecutor::new(agent_bin));
    let registry = Arc::new(DirectoryCommandRegistry::new(commands_dir));
    let vault_lock = VaultLock::new();

    let scheduler = Arc::new(
        Scheduler::builder(&config, executor, registry, vault_lock)
            .tick_interval(Duration::from_secs(tick_interval))
            .recorder(Arc::new(LogRecorder))
            .build(),
    );

    scheduler.start().await;

    let api_config = ApiConfig::new(host, port);
    let server = start_server(api_config, Arc::clone(&scheduler)).await?;

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    scheduler.stop().await;
    server.abort();

    info!("Goodbye!");
    Ok(())
}

/// Validate the schedule file without running.
fn validate_config(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match load_schedule_config(&config) {
        Ok(schedule) => {
            info!(
                "{} is valid: {} job(s), timezone {}",
                config.display(),
                schedule.jobs.len(),
                schedule.timezone
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List the jobs in the schedule file.
fn list_jobs(config: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let schedule = load_schedule_config(&config)?;

    if schedule.jobs.is_empty() {
        println!("No jobs in {}", config.display());
        return Ok(());
    }

    println!("Jobs in {} (timezone {}):", config.display(), schedule.timezone);
    println!();

    for job in &schedule.jobs {
        println!("ID: {}", job.id);
        println!("  Command: {}", job.command);
        if let Some(arguments) = &job.arguments {
            println!("  Arguments: {}", arguments);
        }
        println!("  Cron: {}", job.cron);
        println!("  Enabled: {}", job.enabled);
        match job.overlap {
            OverlapPolicy::Skip => println!("  Overlap: skip"),
            OverlapPolicy::Queue => println!("  Overlap: queue (max {})", job.queue_max),
        }
        if let Some(timeout) = job.timeout_seconds {
            println!("  Timeout: {}s", timeout);
        }
        if let Some(budget) = job.max_budget_usd {
            println!("  Budget: ${:.2}", budget);
        }
        if let Some(model) = &job.model {
            println!("  Model: {}", model);
        }
        if job.use_vault_lock {
            println!("  Vault lock: yes");
        }
        println!();
    }

    Ok(())
}
