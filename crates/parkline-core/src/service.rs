//! Wiring of the engine over the local libSQL queue and the HTTP gateway.

use std::path::Path;

use crate::config::ParklineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::db::{Database, LibSqlKeyValueStore};
use crate::error::{Error, Result};
use crate::gateway::HttpGateway;
use crate::queue::DurableQueue;
use crate::sync::SyncEngine;

/// Engine backed by a libSQL file and the HTTP API
pub type LocalSyncEngine = SyncEngine<LibSqlKeyValueStore, HttpGateway>;

/// Open the queue database at `db_path` and build an engine from `config`.
///
/// `online` seeds the connectivity monitor until a probe or platform event
/// updates it.
pub async fn open_local_engine(
    db_path: &Path,
    config: &ParklineConfig,
    online: bool,
) -> Result<LocalSyncEngine> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Database::open(db_path).await?;
    tracing::debug!("Opened queue database at {}", db_path.display());
    open_engine(db, config, online).await
}

/// Same as `open_local_engine` over an in-memory database (primarily for tests)
pub async fn open_in_memory_engine(
    config: &ParklineConfig,
    online: bool,
) -> Result<LocalSyncEngine> {
    let db = Database::open_in_memory().await?;
    open_engine(db, config, online).await
}

async fn open_engine(
    db: Database,
    config: &ParklineConfig,
    online: bool,
) -> Result<LocalSyncEngine> {
    let gateway = HttpGateway::new(&config.api).map_err(|error| Error::Config(error.to_string()))?;
    let queue =
        DurableQueue::new(LibSqlKeyValueStore::new(db)).with_max_attempts(config.sync.max_attempts);
    let engine = SyncEngine::open(queue, gateway, ConnectivityMonitor::new(online)).await?;
    Ok(engine.with_lease_ttl(config.sync.drain_lease()))
}
