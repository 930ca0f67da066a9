pub mod backend;
pub mod cli;
pub mod data;
pub mod error;
pub mod filename;
pub mod history;
pub mod import;
pub mod instruction;
pub mod normalize;
pub mod schema;
pub mod source;
pub mod writer;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

use crate::{
    backend::SqliteBackend,
    cli::{Cli, Commands},
    history::HistoryStore,
    source::{SourceStatus, SourcesConfig},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_ingest", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => import::execute(&args),
        Commands::History(args) => handle_history(&args),
        Commands::Sources(args) => handle_sources(&args),
    }
}

fn handle_history(args: &cli::HistoryArgs) -> Result<()> {
    let backend = SqliteBackend::open(&args.db)?;
    let history = HistoryStore::new(backend.connection())?;
    let records = history.list(args.source.as_deref(), args.failed)?;
    if records.is_empty() {
        println!("No import history recorded");
        return Ok(());
    }
    for record in records {
        println!(
            "{:<7} attempts={:<2} {}:{} ({} bytes, {:.3}s)",
            record.status.label(),
            record.attempts,
            record.source_name,
            record.file_path,
            record.file_size,
            record.file_processing_time
        );
        if let Some(errors) = &record.errors {
            println!("        errors: {errors}");
        }
    }
    Ok(())
}

fn handle_sources(args: &cli::SourcesArgs) -> Result<()> {
    let config = SourcesConfig::load(&args.config)
        .with_context(|| format!("Loading sources from {:?}", args.config))?;
    for entry in &config.sources {
        let status = match entry.status {
            SourceStatus::Active => "active",
            SourceStatus::Disabled => "disabled",
        };
        println!(
            "{:<20} driver={:<6} status={:<8} root={}",
            entry.name,
            entry.driver,
            status,
            entry.root.display()
        );
    }
    Ok(())
}
