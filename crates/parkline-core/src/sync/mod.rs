//! Sync orchestrator.
//!
//! Routes writes to the remote or the durable queue depending on
//! connectivity, and drains the queue against the remote in
//! Vehicle → Ticket → Infraction order, one record at a time.

mod drain;

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::db::KeyValueStore;
use crate::error::{Error, Result};
use crate::gateway::{self, GatewayError, Photo, RemoteGateway};
use crate::models::{
    idempotency_key, DomainWrite, DrainTrigger, LocalId, Record, RecordKind, SyncFailure,
    SyncSession, SyncState,
};
use crate::queue::DurableQueue;
use crate::util::normalize_plate;

use drain::{DrainGuard, DrainPermit, DrainSnapshot};

const FORCE_OFFLINE_KEY: &str = "settings:force_offline";
const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

/// Why a write went to the local queue instead of the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueReason {
    /// No network connectivity
    Offline,
    /// Operator forced offline mode
    ForcedOffline,
    /// The remote attempt failed
    RemoteFailed(GatewayError),
}

/// Result of `submit_write`. A write that could not be stored at all is the
/// `Err` side of the call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Accepted by the remote
    Confirmed {
        local_id: LocalId,
        data: Value,
    },
    /// Stored locally for a later drain
    Queued { record: Record, reason: QueueReason },
}

impl WriteOutcome {
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    pub const fn local_id(&self) -> LocalId {
        match self {
            Self::Confirmed { local_id, .. } => *local_id,
            Self::Queued { record, .. } => record.local_id,
        }
    }
}

/// Result of `request_sync`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    /// A drain ran; holds the last pass when coalesced requests forced reruns
    Completed(SyncSession),
    /// A drain was already in flight; it will run once more before finishing
    Coalesced,
    /// Another handle on the same queue storage is draining it
    Busy,
}

/// Where a vehicle lookup was answered from
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleLookup {
    Remote(Value),
    /// Registration still waiting in the local queue
    Queued(Record),
}

/// Offline-first sync engine over a durable queue and a remote gateway
pub struct SyncEngine<S, G> {
    queue: DurableQueue<S>,
    gateway: G,
    monitor: ConnectivityMonitor,
    drain: DrainGuard,
    /// Identifies this engine in the queue's drain lease
    owner: Uuid,
    lease_ttl: Duration,
}

impl<S: KeyValueStore, G: RemoteGateway> SyncEngine<S, G> {
    /// Build an engine and restore a persisted forced-offline override.
    ///
    /// Opening never touches queued records; records stranded in `Syncing`
    /// are recovered by the next drain that takes the queue's drain lease.
    pub async fn open(
        queue: DurableQueue<S>,
        gateway: G,
        monitor: ConnectivityMonitor,
    ) -> Result<Self> {
        let forced_offline = queue
            .store()
            .get(FORCE_OFFLINE_KEY)
            .await?
            .is_some_and(|value| value == "true");
        monitor.set_forced_offline(forced_offline);

        Ok(Self {
            queue,
            gateway,
            monitor,
            drain: DrainGuard::default(),
            owner: Uuid::now_v7(),
            lease_ttl: DEFAULT_LEASE_TTL,
        })
    }

    /// How long a drain lease outlives its last renewal. Must exceed the
    /// longest single remote submission.
    #[must_use]
    pub const fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub const fn queue(&self) -> &DurableQueue<S> {
        &self.queue
    }

    pub const fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub const fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Persist and apply the forced-offline override
    pub async fn set_forced_offline(&self, forced_offline: bool) -> Result<()> {
        self.queue
            .store()
            .set(FORCE_OFFLINE_KEY, if forced_offline { "true" } else { "false" })
            .await?;
        self.monitor.set_forced_offline(forced_offline);
        tracing::info!(forced_offline, "Updated offline override");
        Ok(())
    }

    /// Submit a domain write: remote when online, otherwise the durable queue.
    ///
    /// A failed remote attempt falls back to the queue under the same
    /// `local_id`, so a request that reached the remote but lost its response
    /// is retried with an identical idempotency key.
    pub async fn submit_write(&self, kind: RecordKind, payload: Value) -> Result<WriteOutcome> {
        let state = self.monitor.state();
        if !state.is_effectively_online() {
            let reason = if state.forced_offline {
                QueueReason::ForcedOffline
            } else {
                QueueReason::Offline
            };
            let record = self.queue.append(kind, payload).await?;
            tracing::info!(%kind, local_id = %record.local_id, ?reason, "Queued write");
            return Ok(WriteOutcome::Queued { record, reason });
        }

        let local_id = self.queue.reserve_id().await?;
        let key = idempotency_key(kind, local_id);
        match gateway::submit(&self.gateway, kind, &payload, &key).await {
            Ok(data) => {
                tracing::debug!(%kind, %local_id, "Write confirmed by remote");
                Ok(WriteOutcome::Confirmed { local_id, data })
            }
            Err(error) => {
                tracing::warn!(%kind, %local_id, "Remote write failed, queueing: {error}");
                let record = self
                    .queue
                    .append_reserved(local_id, kind, payload, &error.to_string())
                    .await?;
                Ok(WriteOutcome::Queued {
                    record,
                    reason: QueueReason::RemoteFailed(error),
                })
            }
        }
    }

    /// Typed wrapper over `submit_write`
    pub async fn submit<W: DomainWrite + Sync>(&self, write: &W) -> Result<WriteOutcome> {
        let payload = serde_json::to_value(write)?;
        self.submit_write(W::KIND, payload).await
    }

    /// Drain the queue now
    pub async fn request_sync(&self) -> Result<SyncReport> {
        self.drain(DrainTrigger::Manual).await
    }

    /// Run drain passes until no coalesced request is outstanding.
    ///
    /// Fails with `Error::Offline` without touching the queue when the engine
    /// is offline. Returns `Busy` while another handle holds the drain lease.
    pub async fn drain(&self, trigger: DrainTrigger) -> Result<SyncReport> {
        if !self.monitor.is_online() {
            return Err(Error::Offline);
        }

        let Some(permit) = self.drain.try_begin(trigger) else {
            tracing::debug!(?trigger, "Drain already in flight, coalesced");
            return Ok(SyncReport::Coalesced);
        };

        if !self
            .queue
            .acquire_drain_lease(self.owner, self.lease_ttl)
            .await?
        {
            tracing::info!(?trigger, "Queue is being drained by another process");
            permit.abandon();
            return Ok(SyncReport::Busy);
        }

        let report = self.run_passes(&permit).await;
        if let Err(error) = self.queue.release_drain_lease(self.owner).await {
            tracing::warn!("Failed to release drain lease: {error}");
        }
        report
    }

    /// Drain passes under a held lease. No other drain is live, so every
    /// `Syncing` record is stale and goes back to `Pending` first.
    async fn run_passes(&self, permit: &DrainPermit<'_>) -> Result<SyncReport> {
        let recovered = self.queue.recover_interrupted().await?;
        if recovered > 0 {
            tracing::info!(recovered, "Recovered interrupted submissions");
        }

        loop {
            let mut session = SyncSession::start(permit.trigger());
            tracing::info!(session = %session.id, trigger = ?session.trigger, "Drain started");

            self.drain_pass(&mut session, |progress| permit.publish(progress))
                .await?;
            self.clear_synced().await?;
            session.finish();

            tracing::info!(
                session = %session.id,
                attempted = session.attempted,
                succeeded = session.succeeded,
                failed = session.failed,
                "Drain finished"
            );

            if permit
                .complete(session.clone(), self.monitor.is_online())
                .is_none()
            {
                return Ok(SyncReport::Completed(session));
            }
        }
    }

    async fn drain_pass(
        &self,
        session: &mut SyncSession,
        publish: impl Fn(&SyncSession) + Send + Sync,
    ) -> Result<()> {
        publish(session);

        for kind in RecordKind::ALL {
            let mut pending = self.queue.list_pending(kind);
            while let Some(record) = pending.next().await? {
                if !self.monitor.is_online() {
                    tracing::info!("Connectivity lost, stopping drain");
                    return Ok(());
                }
                if !self
                    .queue
                    .acquire_drain_lease(self.owner, self.lease_ttl)
                    .await?
                {
                    tracing::warn!("Drain lease taken over, stopping drain");
                    return Ok(());
                }

                let record = match self.queue.mark_syncing(record.local_id).await {
                    Ok(record) => record,
                    Err(Error::InvalidInput(_) | Error::NotFound(_)) => continue,
                    Err(error) => return Err(error),
                };

                let key = record.idempotency_key();
                match gateway::submit(&self.gateway, kind, &record.payload, &key).await {
                    Ok(_) => {
                        self.queue.mark_synced(record.local_id).await?;
                        session.record_success();
                    }
                    Err(error) => {
                        let message = error.to_string();
                        let state = self.queue.mark_failed(record.local_id, &message).await?;
                        tracing::warn!(
                            %kind,
                            local_id = %record.local_id,
                            ?state,
                            "Submission failed: {message}"
                        );
                        session.record_failure(SyncFailure {
                            kind,
                            local_id: record.local_id,
                            error: message,
                            dead_lettered: state == SyncState::DeadLettered,
                        });
                    }
                }
                publish(session);
            }
        }
        Ok(())
    }

    async fn clear_synced(&self) -> Result<()> {
        for kind in RecordKind::ALL {
            self.queue.clear_if_synced(kind).await?;
        }
        Ok(())
    }

    /// Drain on every offline→online edge and on `interval` while online,
    /// until `shutdown` resolves.
    pub async fn run_auto_sync(
        &self,
        interval: Option<Duration>,
        shutdown: impl Future<Output = ()> + Send,
    ) {
        let mut events = self.monitor.subscribe();
        let mut ticker = interval.map(|period| {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker
        });
        tokio::pin!(shutdown);

        if self.monitor.is_online() {
            self.drain_logged(DrainTrigger::Reconnected).await;
        }

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                event = events.next() => match event {
                    Some(ConnectivityEvent::CameOnline) => {
                        self.drain_logged(DrainTrigger::Reconnected).await;
                    }
                    Some(ConnectivityEvent::WentOffline) => {}
                    None => break,
                },
                () = next_tick(&mut ticker) => {
                    if self.monitor.is_online() {
                        self.drain_logged(DrainTrigger::Periodic).await;
                    }
                }
            }
        }
        tracing::debug!("Auto-sync stopped");
    }

    async fn drain_logged(&self, trigger: DrainTrigger) {
        match self.drain(trigger).await {
            Ok(SyncReport::Completed(session)) if !session.is_clean() => {
                tracing::warn!(failed = session.failed, "Drain left records for retry");
            }
            Ok(_) | Err(Error::Offline) => {}
            Err(error) => tracing::error!(?trigger, "Drain aborted: {error}"),
        }
    }

    /// Look up a vehicle remotely, falling back to locally queued registrations
    pub async fn search_vehicle(&self, plate: &str) -> Result<VehicleLookup> {
        let wanted = normalize_plate(plate);
        if wanted.is_empty() {
            return Err(Error::InvalidInput("plate must not be empty".to_string()));
        }

        if self.monitor.is_online() {
            match self.gateway.search_vehicle(&wanted).await {
                Ok(data) => return Ok(VehicleLookup::Remote(data)),
                Err(error) => tracing::debug!("Remote vehicle search failed: {error}"),
            }
        }

        let queued = self.queue.records(RecordKind::Vehicle).await?;
        queued
            .into_iter()
            .rev()
            .find(|record| {
                record
                    .payload
                    .get("plate")
                    .and_then(Value::as_str)
                    .is_some_and(|candidate| normalize_plate(candidate) == wanted)
            })
            .map(VehicleLookup::Queued)
            .ok_or_else(|| Error::NotFound(format!("vehicle {wanted}")))
    }

    /// Attach photos to a remotely created infraction. Online only.
    pub async fn upload_infraction_photos(
        &self,
        infraction_id: u64,
        photos: Vec<Photo>,
    ) -> Result<Vec<String>> {
        if !self.monitor.is_online() {
            return Err(Error::Offline);
        }
        Ok(self
            .gateway
            .upload_infraction_photos(infraction_id, photos)
            .await?)
    }

    pub(crate) fn drain_snapshot(&self) -> DrainSnapshot {
        self.drain.snapshot()
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests;
