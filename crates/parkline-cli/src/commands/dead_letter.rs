use chrono::Utc;
use parkline_core::SyncState;

use crate::commands::common::{
    format_record_lines, parse_kind_filter, record_to_item, Context, RecordItem,
};
use crate::error::CliError;

pub async fn run_dead_letter_list(
    kind: Option<&str>,
    as_json: bool,
    ctx: &Context,
) -> Result<(), CliError> {
    let kinds = parse_kind_filter(kind)?;
    let engine = ctx.open_engine().await?;

    let mut records = Vec::new();
    for kind in kinds {
        records.extend(
            engine
                .queue()
                .records(kind)
                .await?
                .into_iter()
                .filter(|record| record.sync_state == SyncState::DeadLettered),
        );
    }

    if as_json {
        let now_ms = Utc::now().timestamp_millis();
        let items = records
            .iter()
            .map(|record| record_to_item(record, now_ms))
            .collect::<Vec<RecordItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No dead-lettered records.");
        return Ok(());
    }
    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_dead_letter_retry(kind: Option<&str>, ctx: &Context) -> Result<(), CliError> {
    let kinds = parse_kind_filter(kind)?;
    let engine = ctx.open_engine().await?;

    let mut requeued = 0;
    for kind in kinds {
        requeued += engine.queue().requeue_dead_letters(kind).await?;
    }
    println!("Requeued {requeued} record(s); run `parkline sync` to submit them");
    Ok(())
}
