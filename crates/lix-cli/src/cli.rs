use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "lix",
    about = "Ledger indexer: project committed ledger extensions into history tables",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay ledger extensions through the engine against an in-memory store
    Project(ProjectArgs),
    /// Print the DDL and COPY statement of every output table
    Schema,
    /// Print the effective engine configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ProjectArgs {
    /// JSON file holding one extension or {"extensions": [...]}
    #[arg(short, long)]
    pub input: PathBuf,
    /// TOML engine configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
