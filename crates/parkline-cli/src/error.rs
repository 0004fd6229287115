use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] parkline_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Plate cannot be empty")]
    EmptyPlate,
    #[error("Invalid timestamp '{0}': expected RFC 3339 (e.g. 2026-10-16T08:30:00Z)")]
    InvalidTimestamp(String),
    #[error("{0}")]
    InvalidKind(String),
    #[error("Cannot read photo {path}: {source}")]
    PhotoRead { path: String, source: io::Error },
    #[error("No network connection. Queued records stay pending; retry with `parkline sync` once online.")]
    Offline,
}
