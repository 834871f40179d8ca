//! memento-gather CLI: gather mementos for the stored CDX backlog.

use clap::{Args, Parser, Subcommand};
use memento_gather::{Config, Database, Gatherer, run_with_shutdown};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directives
const LOG_ENV: &str = "MEMENTO_GATHER_LOG";
const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn,reqwest=warn";

#[derive(Parser)]
#[command(name = "memento-gather")]
#[command(about = "Gather archived mementos for discovered CDX records", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch the backlog and gather mementos
    Gather(GatherArgs),
    /// Print Record Store counters
    Stats,
}

#[derive(Args)]
struct GatherArgs {
    /// Offset into the id-ordered backlog to start from
    #[arg(long)]
    start: Option<u64>,

    /// Records per batch
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Outstanding batch count above which the dispatcher blocks
    #[arg(long)]
    max_outstanding: Option<usize>,

    /// Number of workers
    #[arg(long)]
    workers: Option<usize>,

    /// Override the database path
    #[arg(long)]
    database: Option<PathBuf>,
}

impl GatherArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(start) = self.start {
            config.dispatch.start_offset = start;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.dispatch.chunk_size = chunk_size;
        }
        if let Some(max_outstanding) = self.max_outstanding {
            config.dispatch.max_outstanding_batches = max_outstanding;
        }
        if let Some(workers) = self.workers {
            config.worker.workers = workers;
        }
        if let Some(database) = &self.database {
            config.persistence.database_path = database.clone();
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Gather(args) => {
            args.apply(&mut config);
            config.validate()?;

            let gatherer = Gatherer::new(config).await?;
            let summary = run_with_shutdown(&gatherer).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Stats => {
            let db = Database::new(&config.persistence.database_path).await?;
            let stats = db.stats().await?;
            println!("records:    {}", stats.records);
            println!("gathered:   {}", stats.gathered);
            println!("failed:     {}", stats.failed);
            println!("unresolved: {}", stats.unresolved());
            db.close().await;
        }
    }

    Ok(())
}
