//! parkline-core - Core library for Parkline
//!
//! Offline-first synchronization for field enforcement writes: a durable
//! local queue, a connectivity monitor, the remote API gateway, and the
//! orchestrator that reconciles queued records with the remote.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod queue;
pub mod service;
pub mod status;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{LocalId, Record, RecordKind, SyncSession, SyncState};
pub use status::SyncStatus;
pub use sync::{QueueReason, SyncEngine, SyncReport, VehicleLookup, WriteOutcome};
