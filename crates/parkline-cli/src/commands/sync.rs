use parkline_core::SyncReport;

use crate::commands::common::{core_error, format_session_lines, Context};
use crate::error::CliError;

pub async fn run_sync(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    let report = engine.request_sync().await.map_err(core_error)?;

    match report {
        SyncReport::Completed(session) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                for line in format_session_lines(&session) {
                    println!("{line}");
                }
            }
        }
        SyncReport::Coalesced => println!("Sync already in progress"),
        SyncReport::Busy => println!("Another parkline process is syncing this queue"),
    }
    Ok(())
}
