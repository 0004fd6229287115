use parkline_core::connectivity::ConnectivityProbe;

use crate::commands::common::Context;
use crate::error::CliError;

/// Probe connectivity and drain on reconnect/interval until Ctrl-C
pub async fn run_watch(ctx: &Context) -> Result<(), CliError> {
    let config = ctx.load_config()?;
    let engine = ctx.open_engine().await?;

    let probe_task = if ctx.offline {
        None
    } else {
        let probe = ConnectivityProbe::new(
            config.api.normalized_base_url()?,
            config.api.timeout(),
            config.sync.probe_interval(),
        )?;
        let monitor = engine.monitor().clone();
        Some(tokio::spawn(async move { probe.run(&monitor).await }))
    };

    println!("Watching connectivity; press Ctrl-C to stop");
    engine
        .run_auto_sync(config.sync.auto_sync_interval(), async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl-C: {error}");
            }
        })
        .await;

    if let Some(task) = probe_task {
        task.abort();
    }
    println!("Stopped");
    Ok(())
}
