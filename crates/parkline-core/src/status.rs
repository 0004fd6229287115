//! Read-only status view over the queue, connectivity and drain sessions

use std::collections::BTreeMap;

use serde::Serialize;

use crate::db::KeyValueStore;
use crate::error::Result;
use crate::gateway::RemoteGateway;
use crate::models::{RecordKind, SyncSession, SyncState};
use crate::queue::StateCounts;
use crate::sync::SyncEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub forced_offline: bool,
    /// A drain pass is in flight
    pub draining: bool,
    pub per_kind: BTreeMap<RecordKind, StateCounts>,
    /// Running pass, if any
    pub current_session: Option<SyncSession>,
    pub last_session: Option<SyncSession>,
}

impl SyncStatus {
    /// Count of `state` records for `kind`
    pub fn count(&self, kind: RecordKind, state: SyncState) -> usize {
        self.per_kind
            .get(&kind)
            .and_then(|counts| counts.get(&state))
            .copied()
            .unwrap_or(0)
    }

    /// Records still waiting for a drain (pending, failed or in flight)
    pub fn pending_total(&self) -> usize {
        self.sum_states(&[SyncState::Pending, SyncState::Failed, SyncState::Syncing])
    }

    pub fn dead_lettered_total(&self) -> usize {
        self.sum_states(&[SyncState::DeadLettered])
    }

    fn sum_states(&self, states: &[SyncState]) -> usize {
        RecordKind::ALL
            .into_iter()
            .flat_map(|kind| states.iter().map(move |state| self.count(kind, *state)))
            .sum()
    }
}

impl<S: KeyValueStore, G: RemoteGateway> SyncEngine<S, G> {
    /// Snapshot counts per kind, connectivity and the current/last session
    pub async fn status(&self) -> Result<SyncStatus> {
        let mut per_kind = BTreeMap::new();
        for kind in RecordKind::ALL {
            per_kind.insert(kind, self.queue().count_by_state(kind).await?);
        }

        let connectivity = self.monitor().state();
        let drain = self.drain_snapshot();
        Ok(SyncStatus {
            online: connectivity.online,
            forced_offline: connectivity.forced_offline,
            draining: drain.draining,
            per_kind,
            current_session: drain.current,
            last_session: drain.last,
        })
    }
}
