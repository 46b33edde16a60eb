use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use partyhub_agent::{ContentProvider, OpenAiProvider, PromptTemplates};
use partyhub_content::SqliteContentStore;
use partyhub_core::PartyhubConfig;
use partyhub_jobs::{ContentGenerationOrchestrator, GenerationSettings, RetentionCleanup};
use partyhub_scheduler::{DrainOutcome, Scheduler};
use tracing::{info, warn};

mod app;
mod http;

#[derive(Parser)]
#[command(name = "partyhub", about = "Partyhub background jobs and admin API")]
struct Cli {
    /// Config file (defaults to $PARTYHUB_CONFIG, then ~/.partyhub/partyhub.toml)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and the admin HTTP API (default)
    Serve,
    /// Print the registered jobs and their next run times
    Jobs,
    /// Run one job immediately and exit
    Run {
        /// Job name, as listed by `partyhub jobs`
        name: String,
    },
    /// Show what the next retention cleanup would purge
    CleanupPreview,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "partyhub=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit flag > PARTYHUB_CONFIG env > ~/.partyhub/partyhub.toml
    let config_path = cli.config.or_else(|| std::env::var("PARTYHUB_CONFIG").ok());
    let config = PartyhubConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        PartyhubConfig::default()
    });

    let state = build_state(config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(state).await,
        Commands::Jobs => {
            println!("{}", serde_json::to_string_pretty(&state.scheduler.get_jobs())?);
            Ok(())
        }
        Commands::Run { name } => {
            let result = state.scheduler.run_job_now(&name).await;
            let _ = state.scheduler.stop().wait().await;
            result?;
            info!(job = %name, "job finished");
            Ok(())
        }
        Commands::CleanupPreview => {
            let preview = state.cleanup.preview()?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
            Ok(())
        }
    }
}

/// Open the database, build both jobs and register them.
fn build_state(config: PartyhubConfig) -> anyhow::Result<Arc<app::AppState>> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    partyhub_content::db::init_db(&db)?;

    // each subsystem gets its own connection
    let store = Arc::new(SqliteContentStore::new(rusqlite::Connection::open(db_path)?));
    let provider = Arc::new(OpenAiProvider::from_config(&config.provider));
    if !provider.is_configured() {
        warn!("no provider API key configured, content generation runs will be skipped");
    }
    let templates = Arc::new(PromptTemplates::new(config.prompts.dir.as_deref()));

    let generation = Arc::new(ContentGenerationOrchestrator::new(
        provider,
        templates,
        store.clone(),
        store,
        GenerationSettings::from_config(&config.jobs.generation),
    ));
    let cleanup = Arc::new(RetentionCleanup::new(
        rusqlite::Connection::open(db_path)?,
        config.jobs.cleanup.retention_months,
    ));

    let scheduler = Arc::new(Scheduler::new(Duration::from_secs(
        config.scheduler.drain_timeout_secs,
    )));
    scheduler.add_job(Arc::clone(&generation).into_job(&config.jobs.generation))?;
    scheduler.add_job(Arc::clone(&cleanup).into_job(&config.jobs.cleanup))?;

    Ok(Arc::new(app::AppState::new(
        config, scheduler, generation, cleanup,
    )))
}

async fn serve(state: Arc<app::AppState>) -> anyhow::Result<()> {
    state.scheduler.start();

    let admin = &state.config.admin;
    if admin.enabled {
        let addr: SocketAddr = format!("{}:{}", admin.bind, admin.port).parse()?;
        let router = app::build_router(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Partyhub admin API listening on {}", addr);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        info!("admin API disabled");
        shutdown_signal().await;
    }

    info!("stopping scheduler");
    match state.scheduler.stop().wait().await {
        DrainOutcome::Drained => info!("all jobs finished"),
        DrainOutcome::TimedOut => warn!("shutdown timed out with jobs still running"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
