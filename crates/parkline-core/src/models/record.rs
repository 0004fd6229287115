//! Queued record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Domain category of a buffered write.
///
/// Declaration order is the drain priority: vehicles are submitted before the
/// tickets and infractions that may reference them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Vehicle,
    Ticket,
    Infraction,
}

impl RecordKind {
    /// All kinds in drain priority order
    pub const ALL: [Self; 3] = [Self::Vehicle, Self::Ticket, Self::Infraction];

    /// Stable lowercase name, used in storage keys and idempotency keys
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle",
            Self::Ticket => "ticket",
            Self::Infraction => "infraction",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vehicle" | "vehicles" => Ok(Self::Vehicle),
            "ticket" | "tickets" => Ok(Self::Ticket),
            "infraction" | "infractions" => Ok(Self::Infraction),
            other => Err(format!("unknown record kind '{other}'")),
        }
    }
}

/// Locally allocated record identifier.
///
/// Allocated from a persisted counter, so ids increase with insertion order and
/// are never handed out twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(u64);

impl LocalId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for LocalId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Submission state of a queued record.
///
/// `Pending -> Syncing -> Synced | Failed`, `Failed -> Syncing` on the next
/// drain. `Synced` is terminal. `DeadLettered` is entered from a failure once
/// the retry budget is spent and is left only through a manual requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    Syncing,
    Synced,
    Failed,
    DeadLettered,
}

impl SyncState {
    /// States picked up by a drain pass
    #[must_use]
    pub const fn is_drainable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A domain write held in the durable queue until the remote confirms it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub local_id: LocalId,
    pub kind: RecordKind,
    /// Domain attributes, submitted verbatim as the request body
    pub payload: serde_json::Value,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    pub sync_state: SyncState,
    /// Set only while the record is `Failed` or `DeadLettered`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Number of submissions tried so far
    #[serde(default)]
    pub attempts: u32,
}

impl Record {
    /// Create a fresh pending record
    #[must_use]
    pub fn new(local_id: LocalId, kind: RecordKind, payload: serde_json::Value) -> Self {
        Self {
            local_id,
            kind,
            payload,
            created_at: crate::util::unix_timestamp_millis(),
            sync_state: SyncState::Pending,
            last_error: None,
            attempts: 0,
        }
    }

    /// Key the remote uses to discard duplicate submissions of this record.
    ///
    /// Derived only from `kind` and `local_id`, so every retry carries the same key.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        idempotency_key(self.kind, self.local_id)
    }
}

/// Idempotency key for a `(kind, local_id)` pair
#[must_use]
pub fn idempotency_key(kind: RecordKind, local_id: LocalId) -> String {
    format!("{kind}:{local_id}")
}
