use chrono::{DateTime, Utc};
use clap::Parser;
use lunacron_core::config::LunacronConfig;
use lunacron_core::MeeusOracle;
use lunacron_scheduler::Scheduler;
use tracing::{info, warn};

mod cli;
mod jobs;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lunacron=info,lunacron_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // config: --config > LUNACRON_CONFIG env > ~/.lunacron/lunacron.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("LUNACRON_CONFIG").ok());
    let config = LunacronConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        LunacronConfig::default()
    });

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Phases { from, count } => print_phases(from.as_deref(), count),
        Command::List { json } => list(&config, json),
    }
}

async fn run(config: LunacronConfig) -> anyhow::Result<()> {
    let scheduler = Scheduler::builder().config(&config.scheduler).build();
    let registered = jobs::register_configured(&scheduler, &config.jobs);
    if registered == 0 {
        warn!("no jobs configured; waiting anyway");
    }

    for job in scheduler.list_scheduled() {
        info!(job = %job.name, phase = %job.phase, next = %job.next_execution, "scheduled");
    }

    scheduler.start();
    tokio::signal::ctrl_c().await?;
    info!("received SIGINT, shutting down");
    scheduler.shutdown();
    Ok(())
}

fn print_phases(from: Option<&str>, count: usize) -> anyhow::Result<()> {
    let from: DateTime<Utc> = match from {
        Some(s) => DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc),
        None => Utc::now(),
    };
    for (phase, at) in jobs::upcoming_phases(&MeeusOracle::new(), from, count) {
        println!("{:<14} {}", phase.as_str(), at.to_rfc3339());
    }
    Ok(())
}

fn list(config: &LunacronConfig, json: bool) -> anyhow::Result<()> {
    let scheduler = Scheduler::builder().config(&config.scheduler).build();
    jobs::register_configured(&scheduler, &config.jobs);
    let scheduled = scheduler.list_scheduled();

    if json {
        println!("{}", serde_json::to_string_pretty(&scheduled)?);
        return Ok(());
    }
    for job in scheduled {
        println!(
            "{:<20} {:<14} {:>12}ms repeat={:<3} next={}",
            job.name,
            job.phase.as_str(),
            job.offset_ms,
            i64::from(job.repeat),
            job.next_execution.to_rfc3339()
        );
    }
    Ok(())
}
