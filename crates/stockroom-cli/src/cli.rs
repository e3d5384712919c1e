use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "stockroom")]
#[command(about = "Track inventory offline and sync it when the network is back")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a product. It is saved locally first and synced when possible
    #[command(alias = "new")]
    Add {
        /// Product name
        name: String,
        /// Cost price
        cost: f64,
        /// Selling price
        selling: f64,
        /// Company the product belongs to
        #[arg(short, long)]
        company: Option<String>,
        /// Maximum discount in percent
        #[arg(short, long, value_name = "PERCENT")]
        discount: Option<f64>,
        /// Image file to upload with the product
        #[arg(short, long, value_name = "PATH")]
        image: Option<PathBuf>,
        /// Save locally without contacting the remote
        #[arg(long)]
        offline: bool,
    },
    /// List products, confirmed and pending
    List {
        /// Only show products waiting to sync
        #[arg(long)]
        pending: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push pending products to the remote
    Sync,
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completion script for
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Write completions to file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
