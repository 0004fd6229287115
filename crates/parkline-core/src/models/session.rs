//! Drain session summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LocalId, RecordKind};

/// What started a drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainTrigger {
    /// Connectivity went from offline to online
    Reconnected,
    /// Explicit `request_sync` call
    Manual,
    /// Interval timer while online
    Periodic,
}

/// One record that failed during a drain pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub kind: RecordKind,
    pub local_id: LocalId,
    pub error: String,
    /// The failure exhausted the record's retry budget
    pub dead_lettered: bool,
}

/// In-memory account of a single drain pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: Uuid,
    pub trigger: DrainTrigger,
    pub started_at: DateTime<Utc>,
    /// `None` while the pass is still running
    pub finished_at: Option<DateTime<Utc>>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub errors: Vec<SyncFailure>,
}

impl SyncSession {
    #[must_use]
    pub fn start(trigger: DrainTrigger) -> Self {
        Self {
            id: Uuid::now_v7(),
            trigger,
            started_at: Utc::now(),
            finished_at: None,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            dead_lettered: 0,
            errors: Vec::new(),
        }
    }

    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, failure: SyncFailure) {
        self.attempted += 1;
        self.failed += 1;
        if failure.dead_lettered {
            self.dead_lettered += 1;
        }
        self.errors.push(failure);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.finished_at.is_none()
    }

    /// Every attempted record was confirmed
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
