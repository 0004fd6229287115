use crate::commands::common::{format_status_lines, Context};
use crate::error::CliError;

pub async fn run_status(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let engine = ctx.open_engine().await?;
    let status = engine.status().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for line in format_status_lines(&status) {
        println!("{line}");
    }
    println!(
        "{} waiting, {} dead-lettered",
        status.pending_total(),
        status.dead_lettered_total()
    );
    Ok(())
}
