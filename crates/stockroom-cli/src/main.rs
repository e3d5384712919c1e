//! Stockroom CLI - Offline-first inventory from the command line
//!
//! Products are saved to the local queue first and pushed to the remote when
//! it is reachable.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::add::{run_add, AddArgs};
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::list::run_list;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

const DEFAULT_LOG_DIRECTIVE: &str = "stockroom=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = DEFAULT_LOG_DIRECTIVE.parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Add {
            name,
            cost,
            selling,
            company,
            discount,
            image,
            offline,
        } => {
            let args = AddArgs {
                name,
                cost,
                selling,
                company,
                discount,
                image,
                offline,
            };
            run_add(args, &db_path).await?;
        }
        Commands::List { pending, json } => run_list(pending, json, &db_path).await?,
        Commands::Sync => run_sync(&db_path).await?,
        Commands::Status { json } => run_status(json, &db_path).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
