//! lapsed - closes offers and finishes processes once their time is up.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lapse_core::{Clock, Family, Offer, Process, SystemClock};
use lapse_scheduler::{CycleReport, Scheduler, SchedulerConfig, StorageBackend};
use lapse_storage::{EntityStore, JsonStorage, MemoryStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lapsed")]
#[command(about = "Deadline-driven lifecycle scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "lapse.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run,
    /// Run one cycle for a family and exit
    Sweep {
        /// Entity family (offer or process)
        family: Family,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = SchedulerConfig::load(&cli.config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("memory backend selected, nothing persists across restarts");
            let store = Arc::new(MemoryStore::new());
            execute(cli.command, Scheduler::new(store, clock, config)).await
        }
        StorageBackend::Json => {
            let store = Arc::new(JsonStorage::new(&config.storage.path).await?);
            info!(path = %config.storage.path.display(), "using JSON storage");
            execute(cli.command, Scheduler::new(store, clock, config)).await
        }
        StorageBackend::Sqlite => open_sqlite(cli.command, clock, config).await,
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(command: Commands, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Result<()> {
    let url = config
        .storage
        .url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("sqlite backend needs storage.url or LAPSE_DATABASE_URL"))?;
    let store = Arc::new(lapse_storage::SqliteStorage::connect(&url).await?);
    info!("using SQLite storage");
    execute(command, Scheduler::new(store, clock, config)).await
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_: Commands, _: Arc<dyn Clock>, _: SchedulerConfig) -> Result<()> {
    anyhow::bail!("lapsed was built without the `sqlite` feature")
}

async fn execute<S>(command: Commands, scheduler: Scheduler<S>) -> Result<()>
where
    S: EntityStore<Offer> + EntityStore<Process> + 'static,
{
    match command {
        Commands::Run => {
            let config = scheduler.config();
            info!(
                offer = %config.cadence_for(Family::Offer),
                process = %config.cadence_for(Family::Process),
                "starting scheduler"
            );
            let handle = scheduler.start(CancellationToken::new());
            if handle.families() == 0 {
                warn!("no family has an enabled cadence, exiting");
                handle.shutdown().await;
                return Ok(());
            }

            shutdown_signal().await?;
            info!("shutdown requested, letting in-flight cycles finish");
            handle.shutdown().await;
        }
        Commands::Sweep { family } => {
            let report = match family {
                Family::Offer => scheduler.sweep::<Offer>().await,
                Family::Process => scheduler.sweep::<Process>().await,
            };
            print_report(&report);
            if !report.is_success() {
                anyhow::bail!("{} cycle failed: {:?}", report.family, report.outcome);
            }
        }
    }

    Ok(())
}

/// Resolve on Ctrl-C, or on SIGTERM where available.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("Cycle: {} at {}", report.family, report.at);
    println!("  Candidates:   {}", report.candidates);
    println!("  Due:          {}", report.due);
    println!("  Transitioned: {}", report.transitioned);
    println!("  Malformed:    {}", report.malformed);
    println!("  Outcome:      {:?}", report.outcome);
}
