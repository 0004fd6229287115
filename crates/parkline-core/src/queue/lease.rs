//! Drain lease shared by every handle on the same queue storage.
//!
//! Only the lease holder moves records through `Syncing`, so a holder that
//! finds a `Syncing` record knows its drain is gone. The lease expires on its
//! own when a holding process dies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DurableQueue;
use crate::db::KeyValueStore;
use crate::error::Result;
use crate::util::unix_timestamp_millis;

const LEASE_KEY: &str = "queue:drain_lease";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainLease {
    pub owner: Uuid,
    /// Unix milliseconds after which another owner may take the lease
    pub expires_at: i64,
}

impl DrainLease {
    pub const fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

impl<S: KeyValueStore> DurableQueue<S> {
    /// Take or extend the drain lease for `owner` until `ttl` from now.
    ///
    /// Returns `false` without changes while another owner holds a live lease.
    pub async fn acquire_drain_lease(&self, owner: Uuid, ttl: Duration) -> Result<bool> {
        self.write(async {
            let now = unix_timestamp_millis();
            if let Some(current) = self.drain_lease().await? {
                if current.owner != owner && current.is_live(now) {
                    return Ok(false);
                }
            }

            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            let lease = DrainLease {
                owner,
                expires_at: now.saturating_add(ttl_ms),
            };
            self.store
                .set(LEASE_KEY, &serde_json::to_string(&lease)?)
                .await?;
            Ok(true)
        })
        .await
    }

    /// Give up the lease if `owner` holds it
    pub async fn release_drain_lease(&self, owner: Uuid) -> Result<()> {
        self.write(async {
            if self
                .drain_lease()
                .await?
                .is_some_and(|lease| lease.owner == owner)
            {
                self.store.remove(LEASE_KEY).await?;
            }
            Ok(())
        })
        .await
    }

    /// Current lease, live or expired
    pub async fn drain_lease(&self) -> Result<Option<DrainLease>> {
        match self.store.get(LEASE_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
