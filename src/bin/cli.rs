//! ticketguru CLI
//!
//! Local execution entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ticketguru::{
    error::{AppError, Result},
    models::{Config, Credentials},
    pipeline,
    services::{JiraClient, ScorerKind, build_scorers},
    storage::{SqliteStore, TicketStorage},
    utils::http,
};

/// ticketguru - Issue Tracker Ticket Fetcher
#[derive(Parser, Debug)]
#[command(
    name = "ticketguru",
    version,
    about = "Fetches tracker tickets into a local store and scores them"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "ticketguru.toml")]
    config: PathBuf,

    /// Path to the local record store file
    #[arg(long, alias = "dbPath", global = true)]
    db_path: Option<PathBuf>,

    /// Base URL of the tracker instance
    #[arg(long, alias = "jiraURL", global = true)]
    jira_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every ticket of a project into the store
    Fetch {
        /// Tracker project key, e.g. KAFKA
        #[arg(long)]
        project: Option<String>,

        /// Concurrent page workers (at most 100)
        #[arg(long, alias = "goroutinesCount")]
        workers: Option<usize>,
    },

    /// Score stored tickets with external services
    Enrich {
        /// grammar, spelling, sentiment or all
        #[arg(long = "type", default_value = "all")]
        kind: ScorerKind,
    },

    /// Compute derived fields of stored tickets
    Analyze,

    /// Validate the configuration
    Validate,

    /// Show store and configuration info
    Info,

    /// Print one stored ticket as JSON
    Show {
        /// Ticket key, e.g. KAFKA-1234
        key: String,
    },
}

/// Initialize logging; `RUST_LOG` wins over both arguments.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(&cli.config)?;

    if let Some(db_path) = &cli.db_path {
        config.store.path = db_path.clone();
    }
    if let Some(jira_url) = &cli.jira_url {
        config.tracker.base_url = jira_url.clone();
    }
    if let Command::Fetch { project, workers } = &cli.command {
        if let Some(project) = project {
            config.fetch.project = project.clone();
        }
        if let Some(workers) = workers {
            config.fetch.workers = *workers;
        }
    }

    Ok(config)
}

fn open_store(config: &Config) -> Result<Arc<dyn TicketStorage>> {
    let store = SqliteStore::open(&config.store.path, config.store.scan_batch)?;
    Ok(Arc::new(store))
}

/// Run `work` until it finishes or the process receives Ctrl-C.
///
/// Dropping `work` abandons in-flight requests; a store write already on
/// the blocking pool still commits or rolls back as a whole.
async fn interruptible<T>(work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, abandoning in-flight work");
            Err(AppError::Interrupted)
        }
    }
}

async fn run(cli: Cli, config: Arc<Config>) -> Result<()> {
    match cli.command {
        Command::Fetch { .. } => {
            config.validate()?;
            let credentials = Credentials::from_env();
            let client = JiraClient::new(&config.tracker)?;
            client.authenticate(&credentials).await?;

            let store = open_store(&config)?;
            let outcome = interruptible(pipeline::run_fetch(&client, store, &config.fetch)).await?;

            if outcome.pages_failed > 0 {
                log::warn!(
                    "{} of {} pages failed; rerun fetch to fill the gaps",
                    outcome.pages_failed,
                    outcome.pages_total
                );
            }
        }

        Command::Enrich { kind } => {
            config.validate()?;
            let credentials = Credentials::from_env();
            let client = http::create_service_client(&config.tracker)?;
            let scorers = build_scorers(kind, client, &config.enrichment, &credentials)?;

            let store = open_store(&config)?;
            interruptible(pipeline::run_enrichment(
                store,
                &scorers,
                config.enrichment.chunk_size,
            ))
            .await?;
        }

        Command::Analyze => {
            config.validate()?;
            let store = open_store(&config)?;
            let chunk_size = config.enrichment.chunk_size;
            tokio::task::spawn_blocking(move || pipeline::run_analysis(store.as_ref(), chunk_size))
                .await
                .map_err(|e| AppError::store(format!("analysis task failed: {e}")))??;
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");

            let credentials = Credentials::from_env();
            for (var, set) in [
                (Credentials::USERNAME_VAR, !credentials.username.is_empty()),
                (Credentials::PASSWORD_VAR, !credentials.password.is_empty()),
                (Credentials::BING_KEY_VAR, credentials.bing_key.is_some()),
                (Credentials::GCP_KEY_VAR, credentials.gcp_key.is_some()),
            ] {
                log::info!("{} {}", var, if set { "is set" } else { "is not set" });
            }
        }

        Command::Info => {
            log::info!("Tracker: {}", config.tracker.base_url);
            log::info!(
                "Project: {} ({} workers)",
                config.fetch.project,
                config.fetch.workers
            );
            log::info!("Store: {}", config.store.path.display());

            if config.store.path.exists() {
                let store = open_store(&config)?;
                log::info!("Stored tickets: {}", store.count()?);
            } else {
                log::info!("No store found yet.");
            }
        }

        Command::Show { key } => {
            let store = open_store(&config)?;
            let ticket = store
                .get_by_key(&key)?
                .ok_or_else(|| AppError::NotFound(key.clone()))?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
        }
    }

    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_logging(cli.verbose, &config.logging.level);

    log::info!("ticketguru starting...");
    if cli.config.exists() {
        log::debug!("Loaded configuration from {}", cli.config.display());
    } else {
        log::info!("No config file at {}, using defaults", cli.config.display());
    }

    let result = run(cli, Arc::new(config)).await;
    match &result {
        Ok(()) => log::info!("Done!"),
        Err(e) if e.is_fatal() => log::error!("Aborted: {}", e),
        Err(e) => log::error!("{}", e),
    }
    result
}
