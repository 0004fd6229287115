//! Durable local queue for writes that have not reached the remote yet.
//!
//! Records live in one JSON bucket per kind inside the key-value store, in
//! insertion order. Every mutation is written through to storage before the
//! call returns, so a crash never loses an acknowledged record. `local_id`s
//! come from a persisted counter shared by all kinds and are never reused.

mod lease;

use std::collections::{BTreeMap, HashSet};
use std::future::Future;

use tokio::sync::Mutex;

use crate::db::KeyValueStore;
use crate::error::{Error, Result};
use crate::models::{LocalId, Record, RecordKind, SyncState};

pub use lease::DrainLease;

const SEQUENCE_KEY: &str = "queue:seq";

fn bucket_key(kind: RecordKind) -> String {
    format!("queue:{kind}")
}

/// `Failed`, or `DeadLettered` once `attempts` reaches the cap
fn state_after_failure(max_attempts: Option<u32>, attempts: u32) -> SyncState {
    if max_attempts.is_some_and(|max| attempts >= max) {
        SyncState::DeadLettered
    } else {
        SyncState::Failed
    }
}

/// Report any failure to make a write durable as `Error::Storage`
fn into_storage(error: Error, context: &str) -> Error {
    match error {
        Error::Storage(_) => error,
        other => Error::Storage(format!("{context}: {other}")),
    }
}

fn not_drainable(record: &Record) -> Error {
    Error::InvalidInput(format!(
        "cannot submit {} record {} in state {}",
        record.kind, record.local_id, record.sync_state
    ))
}

/// Per-state record counts for one kind
pub type StateCounts = BTreeMap<SyncState, usize>;

/// Crash-tolerant, per-kind FIFO of pending records
pub struct DurableQueue<S> {
    store: S,
    /// Serializes read-modify-write cycles on buckets and the id counter
    write_lock: Mutex<()>,
    max_attempts: Option<u32>,
}

impl<S: KeyValueStore> DurableQueue<S> {
    /// Create a queue over the given store with no retry cap
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            max_attempts: None,
        }
    }

    /// Dead-letter records once they fail this many submissions
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Underlying key-value store
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Persist a new pending record and return it.
    ///
    /// Fails with `Error::Storage` when the record could not be made durable.
    pub async fn append(&self, kind: RecordKind, payload: serde_json::Value) -> Result<Record> {
        let record = self
            .write(async {
                let local_id = self.allocate_id().await?;
                self.push(Record::new(local_id, kind, payload)).await
            })
            .await
            .map_err(|error| into_storage(error, &format!("failed to persist {kind} record")))?;

        tracing::debug!(%kind, local_id = %record.local_id, "Queued record");
        Ok(record)
    }

    /// Allocate a `local_id` without storing a record.
    ///
    /// Used when a write is sent to the remote first: the id doubles as the
    /// idempotency key and is reused by `append_reserved` if the send fails.
    pub async fn reserve_id(&self) -> Result<LocalId> {
        self.write(self.allocate_id())
            .await
            .map_err(|error| into_storage(error, "failed to allocate record id"))
    }

    /// Persist a record whose first remote submission, under an id obtained
    /// from `reserve_id`, failed with `error`.
    ///
    /// The record starts as `Failed` with that attempt counted, so it shares
    /// the retry budget of records submitted by a drain.
    pub async fn append_reserved(
        &self,
        local_id: LocalId,
        kind: RecordKind,
        payload: serde_json::Value,
        error: &str,
    ) -> Result<Record> {
        let mut record = Record::new(local_id, kind, payload);
        record.attempts = 1;
        record.sync_state = state_after_failure(self.max_attempts, record.attempts);
        record.last_error = Some(error.to_string());

        let record = self
            .write(async {
                for existing in RecordKind::ALL {
                    if self
                        .load_bucket(existing)
                        .await?
                        .iter()
                        .any(|r| r.local_id == local_id)
                    {
                        return Err(Error::InvalidInput(format!(
                            "record id {local_id} is already queued"
                        )));
                    }
                }
                self.push(record).await
            })
            .await
            .map_err(|error| match error {
                Error::InvalidInput(_) => error,
                other => into_storage(other, &format!("failed to persist {kind} record")),
            })?;

        tracing::debug!(%kind, %local_id, state = %record.sync_state, "Queued failed write");
        Ok(record)
    }

    /// Append `record` to its bucket; runs inside `write`
    async fn push(&self, record: Record) -> Result<Record> {
        let mut records = self.load_bucket(record.kind).await?;
        records.push(record.clone());
        self.save_bucket(record.kind, &records).await?;
        Ok(record)
    }

    /// Lazily iterate records of `kind` awaiting submission, oldest first
    pub fn list_pending(&self, kind: RecordKind) -> PendingCursor<'_, S> {
        PendingCursor {
            queue: self,
            kind,
            seen: HashSet::new(),
        }
    }

    /// All stored records of `kind`, in insertion order
    pub async fn records(&self, kind: RecordKind) -> Result<Vec<Record>> {
        self.load_bucket(kind).await
    }

    /// Look up a stored record by id
    pub async fn get(&self, local_id: LocalId) -> Result<Option<Record>> {
        for kind in RecordKind::ALL {
            let records = self.load_bucket(kind).await?;
            if let Some(record) = records.into_iter().find(|r| r.local_id == local_id) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Move a pending or failed record to `Syncing` and count the attempt
    pub async fn mark_syncing(&self, local_id: LocalId) -> Result<Record> {
        let record = self
            .update_record(local_id, |record| {
                if !record.sync_state.is_drainable() {
                    return Err(not_drainable(record));
                }
                record.sync_state = SyncState::Syncing;
                record.attempts = record.attempts.saturating_add(1);
                record.last_error = None;
                Ok(())
            })
            .await?
            .ok_or_else(|| Error::NotFound(format!("queued record {local_id}")))?;

        // Synced records come back untouched
        if record.sync_state == SyncState::Syncing {
            Ok(record)
        } else {
            Err(not_drainable(&record))
        }
    }

    /// Mark a record as confirmed by the remote.
    ///
    /// Idempotent: repeating the call, or calling it for a record whose bucket
    /// was already cleared, is a no-op.
    pub async fn mark_synced(&self, local_id: LocalId) -> Result<()> {
        let updated = self
            .update_record(local_id, |record| {
                record.sync_state = SyncState::Synced;
                record.last_error = None;
                Ok(())
            })
            .await?;

        if updated.is_none() {
            tracing::debug!(%local_id, "mark_synced on unknown record ignored");
        }
        Ok(())
    }

    /// Record a failed submission and return the resulting state.
    ///
    /// The record becomes `Failed`, or `DeadLettered` when this failure spends
    /// the last allowed attempt. Synced records are left untouched.
    pub async fn mark_failed(&self, local_id: LocalId, error: &str) -> Result<SyncState> {
        let max_attempts = self.max_attempts;
        let record = self
            .update_record(local_id, |record| {
                record.sync_state = state_after_failure(max_attempts, record.attempts);
                record.last_error = Some(error.to_string());
                Ok(())
            })
            .await?
            .ok_or_else(|| Error::NotFound(format!("queued record {local_id}")))?;

        Ok(record.sync_state)
    }

    /// Count stored records of `kind` by state
    pub async fn count_by_state(&self, kind: RecordKind) -> Result<StateCounts> {
        let mut counts = StateCounts::new();
        for record in self.load_bucket(kind).await? {
            *counts.entry(record.sync_state).or_default() += 1;
        }
        Ok(counts)
    }

    /// Remove the bucket for `kind` if every record in it is `Synced`.
    ///
    /// Returns whether the bucket was removed.
    pub async fn clear_if_synced(&self, kind: RecordKind) -> Result<bool> {
        let cleared = self
            .write(async {
                let records = self.load_bucket(kind).await?;
                if records.is_empty() || records.iter().any(|r| r.sync_state != SyncState::Synced)
                {
                    return Ok(0);
                }
                self.store.remove(&bucket_key(kind)).await?;
                Ok(records.len())
            })
            .await?;

        if cleared > 0 {
            tracing::info!(%kind, cleared, "Cleared fully synced bucket");
        }
        Ok(cleared > 0)
    }

    /// Return records stranded in `Syncing` to `Pending`.
    ///
    /// Only the holder of the drain lease may call this: any `Syncing`
    /// record is then left over from a drain that no longer runs. Returns how
    /// many records were reset.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        self.write(async {
            let mut recovered = 0;
            for kind in RecordKind::ALL {
                let mut records = self.load_bucket(kind).await?;
                let mut changed = 0;
                for record in records
                    .iter_mut()
                    .filter(|r| r.sync_state == SyncState::Syncing)
                {
                    record.sync_state = SyncState::Pending;
                    record.last_error = None;
                    changed += 1;
                }
                if changed > 0 {
                    self.save_bucket(kind, &records).await?;
                    tracing::warn!(
                        %kind,
                        count = changed,
                        "Reset interrupted submissions to pending"
                    );
                    recovered += changed;
                }
            }
            Ok(recovered)
        })
        .await
    }

    /// Return dead-lettered records of `kind` to `Pending` with a fresh retry budget
    pub async fn requeue_dead_letters(&self, kind: RecordKind) -> Result<usize> {
        let requeued = self
            .write(async {
                let mut records = self.load_bucket(kind).await?;
                let mut requeued = 0;
                for record in records
                    .iter_mut()
                    .filter(|r| r.sync_state == SyncState::DeadLettered)
                {
                    record.sync_state = SyncState::Pending;
                    record.attempts = 0;
                    record.last_error = None;
                    requeued += 1;
                }
                if requeued > 0 {
                    self.save_bucket(kind, &records).await?;
                }
                Ok(requeued)
            })
            .await?;

        if requeued > 0 {
            tracing::info!(%kind, count = requeued, "Requeued dead-lettered records");
        }
        Ok(requeued)
    }

    /// Run `work` as one storage transaction under the in-process write lock.
    ///
    /// The store's writer lock shuts out other handles on the same database,
    /// so every read-modify-write sees the buckets its predecessor committed.
    async fn write<T>(&self, work: impl Future<Output = Result<T>> + Send) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        self.store.begin_write().await?;

        let outcome = match work.await {
            Ok(value) => self.store.commit().await.map(|()| value),
            Err(error) => Err(error),
        };
        if outcome.is_err() {
            if let Err(rollback_error) = self.store.rollback().await {
                tracing::warn!("Rollback failed: {rollback_error}");
            }
        }
        outcome
    }

    async fn allocate_id(&self) -> Result<LocalId> {
        let current = match self.store.get(SEQUENCE_KEY).await? {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                Error::Storage(format!("corrupt record id counter '{}'", raw.trim()))
            })?,
            None => 0,
        };
        let next = current + 1;
        // A reserved id whose record never lands is skipped, never reissued
        self.store.set(SEQUENCE_KEY, &next.to_string()).await?;
        Ok(LocalId::new(next))
    }

    async fn load_bucket(&self, kind: RecordKind) -> Result<Vec<Record>> {
        match self.store.get(&bucket_key(kind)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_bucket(&self, kind: RecordKind, records: &[Record]) -> Result<()> {
        let raw = serde_json::to_string(records)?;
        self.store.set(&bucket_key(kind), &raw).await
    }

    /// Apply `change` to the record with `local_id` and persist its bucket.
    ///
    /// Returns `None` when no bucket holds the record. Synced records are
    /// returned unchanged without invoking `change`.
    async fn update_record<F>(&self, local_id: LocalId, change: F) -> Result<Option<Record>>
    where
        F: FnOnce(&mut Record) -> Result<()> + Send,
    {
        self.write(async {
            for kind in RecordKind::ALL {
                let mut records = self.load_bucket(kind).await?;
                let Some(record) = records.iter_mut().find(|r| r.local_id == local_id) else {
                    continue;
                };

                if record.sync_state == SyncState::Synced {
                    return Ok(Some(record.clone()));
                }

                change(record)?;
                let updated = record.clone();
                self.save_bucket(kind, &records).await?;
                return Ok(Some(updated));
            }
            Ok(None)
        })
        .await
    }
}

/// Restartable cursor over drainable records of one kind.
///
/// Each step re-reads the persisted bucket, so records appended or resolved
/// while iterating are observed. A record is yielded at most once per pass,
/// which keeps one that fails mid-pass from being retried in the same pass.
pub struct PendingCursor<'a, S> {
    queue: &'a DurableQueue<S>,
    kind: RecordKind,
    seen: HashSet<LocalId>,
}

impl<S: KeyValueStore> PendingCursor<'_, S> {
    /// Oldest drainable record not yet yielded
    pub async fn next(&mut self) -> Result<Option<Record>> {
        let records = self.queue.load_bucket(self.kind).await?;
        let next = records.into_iter().find(|record| {
            record.sync_state.is_drainable() && !self.seen.contains(&record.local_id)
        });

        if let Some(record) = &next {
            self.seen.insert(record.local_id);
        }
        Ok(next)
    }

    /// Start again from the oldest drainable record
    pub fn restart(&mut self) {
        self.seen.clear();
    }

    /// Drain the cursor into a vector
    pub async fn collect(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }
}
