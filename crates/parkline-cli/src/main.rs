//! Parkline CLI - Record enforcement writes from the terminal
//!
//! Writes go to the remote when it is reachable and into the local queue
//! otherwise; `parkline sync` and `parkline watch` drain the queue.

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{
    Cli, Commands, DeadLetterCommands, InfractionCommands, TicketCommands, VehicleCommands,
};
use crate::commands::common::{resolve_config_path, resolve_db_path, Context};
use crate::commands::completions::run_completions;
use crate::commands::dead_letter::{run_dead_letter_list, run_dead_letter_retry};
use crate::commands::infraction::{run_infraction_create, run_infraction_photos};
use crate::commands::offline::run_offline;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::ticket::run_ticket_create;
use crate::commands::vehicle::{run_vehicle_register, run_vehicle_search};
use crate::commands::watch::run_watch;
use crate::error::CliError;

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
    if let Ok(directive) = "parkline=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context {
        db_path: resolve_db_path(cli.db_path),
        config_path: resolve_config_path(cli.config),
        offline: cli.offline,
    };

    match cli.command {
        Commands::Vehicle { command } => match command {
            VehicleCommands::Register(args) => run_vehicle_register(args, &ctx).await?,
            VehicleCommands::Search { plate, json } => {
                run_vehicle_search(&plate, json, &ctx).await?;
            }
        },
        Commands::Ticket { command } => match command {
            TicketCommands::Create(args) => run_ticket_create(args, &ctx).await?,
        },
        Commands::Infraction { command } => match command {
            InfractionCommands::Create(args) => run_infraction_create(args, &ctx).await?,
            InfractionCommands::Photos {
                infraction_id,
                files,
            } => run_infraction_photos(infraction_id, &files, &ctx).await?,
        },
        Commands::Sync { json } => run_sync(json, &ctx).await?,
        Commands::Status { json } => run_status(json, &ctx).await?,
        Commands::Offline { command } => run_offline(command, &ctx).await?,
        Commands::DeadLetter { command } => match command {
            DeadLetterCommands::List { kind, json } => {
                run_dead_letter_list(kind.as_deref(), json, &ctx).await?;
            }
            DeadLetterCommands::Retry { kind } => {
                run_dead_letter_retry(kind.as_deref(), &ctx).await?;
            }
        },
        Commands::Watch => run_watch(&ctx).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
