//! Tally CLI - operator surface of a point-of-sale terminal
//!
//! Inspect and drain the mutation queue, settle conflicts, check integrity
//! and close business days from the terminal.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, CloseCommands, Commands, ConflictCommands, QueueCommands};
use crate::commands::close::{run_close, run_close_check, run_close_resume, ConsoleCloseObserver};
use crate::commands::common::{open_engine, resolve_config_path, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::config::run_config_show;
use crate::commands::conflicts::{run_conflicts_list, run_conflicts_resolve};
use crate::commands::integrity::run_integrity;
use crate::commands::queue::{run_queue_list, run_queue_retry};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_sync_watch};
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "tally=info,audit=warn";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let db_path = resolve_db_path(cli.db_path);

    match &cli.command {
        Commands::Config => return run_config_show(&config_path),
        Commands::Completions { shell, output } => {
            return run_completions(*shell, output.as_deref());
        }
        _ => {}
    }

    let quiet = wants_json(&cli.command);
    let observer = Arc::new(ConsoleCloseObserver::new(quiet));
    let engine = open_engine(&config_path, &db_path, Some(observer)).await?;

    match cli.command {
        Commands::Status { json } => run_status(&engine, json).await?,
        Commands::Queue { command } => match command {
            QueueCommands::List { limit, json } => run_queue_list(&engine, limit, json).await?,
            QueueCommands::Retry => {
                run_queue_retry(&engine).await?;
            }
        },
        Commands::Sync {
            timeout,
            watch,
            json,
        } => {
            if watch {
                run_sync_watch(&engine).await?;
            } else {
                run_sync(&engine, timeout, json).await?;
            }
        }
        Commands::Conflicts { command } => match command {
            ConflictCommands::List { limit, all, json } => {
                run_conflicts_list(&engine, limit, all, json).await?;
            }
            ConflictCommands::Resolve {
                id,
                strategy,
                payload,
                by,
            } => {
                run_conflicts_resolve(&engine, id, strategy, payload.as_deref(), &by).await?;
            }
        },
        Commands::Integrity { date, json } => {
            run_integrity(&engine, date, json).await?;
        }
        Commands::Close { command } => match command {
            CloseCommands::Check { date, json } => {
                run_close_check(&engine, date, json).await?;
            }
            CloseCommands::Run {
                date,
                skip_integrity,
                json,
            } => {
                run_close(&engine, date, skip_integrity, json).await?;
            }
            CloseCommands::Resume => {
                run_close_resume(&engine).await?;
            }
        },
        Commands::Config | Commands::Completions { .. } => {}
    }

    Ok(())
}

/// JSON output replaces the human-readable close printout
const fn wants_json(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Close {
            command: CloseCommands::Run { json: true, .. } | CloseCommands::Check { json: true, .. }
        }
    )
}
