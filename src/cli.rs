use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Import delimited files into relational tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch files from configured sources and import them
    Import(ImportArgs),
    /// Show the per-file import history ledger
    History(HistoryArgs),
    /// List configured sources and their status
    Sources(SourcesArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// YAML file describing the remote sources
    #[arg(short, long)]
    pub config: PathBuf,
    /// SQLite database holding target tables and the history ledger
    #[arg(short, long)]
    pub db: PathBuf,
    /// Restrict the run to a single named source
    #[arg(short, long)]
    pub source: Option<String>,
    /// Restrict the run to a single file path within the source
    #[arg(short, long)]
    pub file: Option<String>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// SQLite database holding the history ledger
    #[arg(short, long)]
    pub db: PathBuf,
    /// Restrict the listing to a single named source
    #[arg(short, long)]
    pub source: Option<String>,
    /// Show only files whose last attempt failed
    #[arg(long)]
    pub failed: bool,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    /// YAML file describing the remote sources
    #[arg(short, long)]
    pub config: PathBuf,
}
