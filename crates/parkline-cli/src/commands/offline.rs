use crate::cli::OfflineCommands;
use crate::commands::common::Context;
use crate::error::CliError;

pub async fn run_offline(command: Option<OfflineCommands>, ctx: &Context) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;

    match command.unwrap_or(OfflineCommands::Show) {
        OfflineCommands::On => {
            engine.set_forced_offline(true).await?;
            println!("Forced offline mode enabled; writes will be queued");
        }
        OfflineCommands::Off => {
            engine.set_forced_offline(false).await?;
            println!("Forced offline mode disabled");
        }
        OfflineCommands::Show => {
            let state = engine.monitor().state();
            println!(
                "forced_offline={} network={}",
                state.forced_offline,
                if state.online { "up" } else { "down" }
            );
        }
    }
    Ok(())
}
