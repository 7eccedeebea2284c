use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ledger_indexer::db::{self, PgStore};
use ledger_indexer::processor::BatchProcessor;
use ledger_indexer::settings::{LinkageMode, LogFormat, Settings};
use ledger_indexer::source::BlockSource;
use ledger_indexer::Indexer;

#[derive(Parser)]
#[command(name = "ledger-indexer", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations and exit
    Migrate,
    /// Stage every block of a JSON-lines file without touching linkage
    Stage { file: PathBuf },
    /// Rebuild the input-output links over everything staged
    Link,
    /// Transform the blocks in a height range
    Transform {
        from: u32,
        /// Defaults to `from`
        to: Option<u32>,
    },
    /// Recompute forward pointers over a height range
    RepairLinkage { from: u32, to: u32 },
    /// Insert every block of a JSON-lines file, linking each onto its predecessor
    InsertBlock { file: PathBuf },
    /// Delete a block and make its predecessor the tip again
    DeleteBlock { height: u32 },
    /// Print the heights missing from `start` up to the highest stored block
    Skipped {
        #[arg(default_value_t = 0)]
        start: u32,
    },
    /// Recompute every address's stats
    RefreshStats,
    /// Stage, link, transform, refresh stats and repair linkage for one file
    Sync {
        file: PathBuf,
        #[arg(long, value_enum)]
        linkage_mode: Option<LinkageMode>,
    },
}

fn run(cli: Cli, settings: Settings) -> Result<()> {
    let db_pool = db::create_connection_pool(
        settings.require_database_url()?,
        settings.pool_size,
        settings.connection_timeout(),
    )?;
    info!("Database connection pool created");

    {
        let mut conn = db_pool
            .get()
            .context("Failed to get database connection for migrations")?;
        db::run_migrations(&mut conn).context("Failed to run database migrations")?;
    }

    let indexer = Arc::new(Indexer::new(
        PgStore::new(db_pool),
        settings.unspent_policy,
    ));
    info!("Unspent policy: {:?}", settings.unspent_policy);

    match cli.command {
        Command::Migrate => {}
        Command::Stage { file } => {
            let mut staged = 0;
            for block in BlockSource::open(&file)? {
                let block = block?;
                indexer
                    .stage_block(&block)
                    .with_context(|| format!("Failed to stage block {}", block.header.height))?;
                staged += 1;
            }
            info!("Staged {} blocks from {}", staged, file.display());
        }
        Command::Link => {
            let links = indexer.link().context("Link pass failed")?;
            info!("Stored {} links", links);
        }
        Command::Transform { from, to } => {
            let to = to.unwrap_or(from);
            let processor =
                BatchProcessor::new(Arc::clone(&indexer), settings.workers, settings.linkage_mode);
            let heights: Vec<u32> = indexer
                .heights_from(from)?
                .into_iter()
                .take_while(|h| *h <= to)
                .collect();
            let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let (transformed, queries) = rt.block_on(processor.transform_heights(heights))?;
            info!(
                "Transformed {} blocks in {}..={} ({} queries)",
                transformed, from, to, queries
            );
        }
        Command::RepairLinkage { from, to } => {
            let updated = indexer
                .repair_linkage(from..=to)
                .context("Linkage repair failed")?;
            info!("Updated {} forward pointers", updated);
        }
        Command::InsertBlock { file } => {
            for block in BlockSource::open(&file)? {
                let block = block?;
                indexer
                    .insert_block(&block)
                    .with_context(|| format!("Failed to insert block {}", block.header.height))?;
            }
        }
        Command::DeleteBlock { height } => {
            indexer
                .delete_block(height)
                .with_context(|| format!("Failed to delete block {}", height))?;
        }
        Command::Skipped { start } => {
            for height in indexer.skipped_heights(start)? {
                println!("{}", height);
            }
        }
        Command::RefreshStats => {
            let addresses = indexer.refresh_address_stats()?;
            info!("Refreshed stats for {} addresses", addresses);
        }
        Command::Sync { file, linkage_mode } => {
            let mode = linkage_mode.unwrap_or(settings.linkage_mode);
            let processor = BatchProcessor::new(Arc::clone(&indexer), settings.workers, mode);
            let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let report = rt
                .block_on(processor.run_batch(file.clone()))
                .with_context(|| format!("Batch from {} failed", file.display()))?;
            info!(
                "Synced {} blocks, {} transformed, {} addresses, {} pointers updated",
                report.staged, report.transformed, report.addresses, report.pointers_updated
            );
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    init_tracing(settings.log_format);
    info!("Starting ledger indexer");

    if let Err(e) = run(cli, settings) {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
    info!("Application has finished and is shutting down.");
}
