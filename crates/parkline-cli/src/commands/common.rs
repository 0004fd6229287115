use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parkline_core::config::ParklineConfig;
use parkline_core::connectivity::ConnectivityProbe;
use parkline_core::models::DomainWrite;
use parkline_core::service::{open_local_engine, LocalSyncEngine};
use parkline_core::util::normalize_plate;
use parkline_core::{QueueReason, Record, RecordKind, SyncSession, SyncStatus, WriteOutcome};
use serde::Serialize;

use crate::error::CliError;

/// Paths and flags shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub offline: bool,
}

impl Context {
    pub fn load_config(&self) -> Result<ParklineConfig, CliError> {
        Ok(ParklineConfig::load(&self.config_path)?)
    }

    /// Open the engine, seeding connectivity from a single reachability probe
    pub async fn open_engine(&self) -> Result<LocalSyncEngine, CliError> {
        let config = self.load_config()?;
        let online = if self.offline {
            false
        } else {
            let probe = ConnectivityProbe::new(
                config.api.normalized_base_url()?,
                config.api.timeout(),
                config.sync.probe_interval(),
            )?;
            probe.check().await
        };
        tracing::debug!(online, "Initial connectivity");

        Ok(open_local_engine(&self.db_path, &config, online).await?)
    }
}

#[derive(Debug, Serialize)]
pub struct RecordItem {
    pub local_id: u64,
    pub kind: RecordKind,
    pub state: String,
    pub attempts: u32,
    pub created_at: i64,
    pub relative_time: String,
    pub last_error: Option<String>,
    pub payload: serde_json::Value,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("PARKLINE_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parkline")
        .join("parkline.db")
}

pub fn resolve_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("PARKLINE_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parkline")
        .join("config.json")
}

/// Map core errors, giving `Offline` a CLI-specific hint
pub fn core_error(error: parkline_core::Error) -> CliError {
    match error {
        parkline_core::Error::Offline => CliError::Offline,
        other => CliError::Core(other),
    }
}

/// Trim and validate a plate argument, returning its canonical form
pub fn normalize_plate_arg(plate: &str) -> Result<String, CliError> {
    let normalized = normalize_plate(plate);
    if normalized.is_empty() {
        Err(CliError::EmptyPlate)
    } else {
        Ok(normalized)
    }
}

pub fn parse_kind_filter(kind: Option<&str>) -> Result<Vec<RecordKind>, CliError> {
    match kind {
        Some(kind) => Ok(vec![kind.parse().map_err(CliError::InvalidKind)?]),
        None => Ok(RecordKind::ALL.to_vec()),
    }
}

pub async fn submit_and_report<W: DomainWrite + Sync>(
    engine: &LocalSyncEngine,
    write: &W,
) -> Result<(), CliError> {
    let outcome = engine.submit(write).await.map_err(core_error)?;
    for line in format_write_outcome(W::KIND, &outcome) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_write_outcome(kind: RecordKind, outcome: &WriteOutcome) -> Vec<String> {
    match outcome {
        WriteOutcome::Confirmed { local_id, .. } => {
            vec![format!("Confirmed remotely ({kind} #{local_id})")]
        }
        WriteOutcome::Queued { record, reason } => vec![
            format!("Queued for sync ({kind} #{})", record.local_id),
            format!("  reason: {}", describe_queue_reason(reason)),
        ],
    }
}

pub fn describe_queue_reason(reason: &QueueReason) -> String {
    match reason {
        QueueReason::Offline => "offline".to_string(),
        QueueReason::ForcedOffline => "forced offline".to_string(),
        QueueReason::RemoteFailed(error) => format!("remote failed: {error}"),
    }
}

pub fn record_to_item(record: &Record, now_ms: i64) -> RecordItem {
    RecordItem {
        local_id: record.local_id.get(),
        kind: record.kind,
        state: record.sync_state.to_string(),
        attempts: record.attempts,
        created_at: record.created_at,
        relative_time: format_relative_time(record.created_at, now_ms),
        last_error: record.last_error.clone(),
        payload: record.payload.clone(),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let plate = record
                .payload
                .get("plate")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("-");
            let relative_time = format_relative_time(record.created_at, now_ms);
            let mut line = format!(
                "{:<10} #{:<6} {:<10} attempts={} {relative_time}",
                record.kind, record.local_id, plate, record.attempts
            );
            if let Some(error) = &record.last_error {
                line.push_str(&format!("  ({error})"));
            }
            line
        })
        .collect()
}

pub fn format_session_lines(session: &SyncSession) -> Vec<String> {
    let mut lines = vec![format!(
        "Session {} ({:?}): {} attempted, {} synced, {} failed",
        session.id, session.trigger, session.attempted, session.succeeded, session.failed
    )];
    if session.dead_lettered > 0 {
        lines.push(format!("  {} dead-lettered", session.dead_lettered));
    }
    for failure in &session.errors {
        lines.push(format!(
            "  {} #{}: {}",
            failure.kind, failure.local_id, failure.error
        ));
    }
    lines
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    let connectivity = match (status.online, status.forced_offline) {
        (_, true) => "forced offline",
        (true, false) => "online",
        (false, false) => "offline",
    };
    let mut lines = vec![format!("Connectivity: {connectivity}")];
    if status.draining {
        lines.push("Sync in progress".to_string());
    }

    for (kind, counts) in &status.per_kind {
        if counts.is_empty() {
            lines.push(format!("{kind:<10} empty"));
            continue;
        }
        let rendered = counts
            .iter()
            .map(|(state, count)| format!("{state}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("{kind:<10} {rendered}"));
    }

    match &status.last_session {
        Some(session) => {
            let finished = session
                .finished_at
                .map_or_else(|| "running".to_string(), |at| at.to_rfc3339());
            lines.push(format!("Last sync: {finished}"));
            lines.extend(format_session_lines(session));
        }
        None => lines.push("Last sync: never (this process)".to_string()),
    }
    lines
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// MIME type for an image path, by extension
pub fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}
