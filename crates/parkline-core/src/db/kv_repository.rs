//! Key-value repository implementation

use std::future::Future;

use crate::error::Result;
use libsql::Connection;

use super::Database;

/// Durable key-value storage contract used by the local queue.
///
/// Values written with `set` must be readable after a process restart.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Delete `key`; deleting a missing key succeeds
    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Start a write transaction that excludes every other writer of the
    /// same storage, including other processes, until `commit` or `rollback`.
    ///
    /// Stores with a single writer can keep the default no-op.
    fn begin_write(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Make the writes since `begin_write` durable and release the writer lock
    fn commit(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Discard the writes since `begin_write` and release the writer lock
    fn rollback(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// libSQL implementation of `KeyValueStore` over the `kv_store` table
pub struct LibSqlKeyValueStore {
    db: Database,
}

impl LibSqlKeyValueStore {
    /// Create a store backed by the given database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    fn conn(&self) -> &Connection {
        self.db.connection()
    }
}

impl KeyValueStore for LibSqlKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = crate::util::unix_timestamp_millis();
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                libsql::params![key, value, now],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM kv_store WHERE key = ?", [key])
            .await?;
        Ok(())
    }

    async fn begin_write(&self) -> Result<()> {
        if !self.conn().is_autocommit() {
            // Left open by a writer whose future was dropped mid-transaction
            tracing::warn!("Rolling back abandoned write transaction");
            self.conn().execute("ROLLBACK", ()).await?;
        }
        self.conn().execute("BEGIN IMMEDIATE", ()).await?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.conn().execute("COMMIT", ()).await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if !self.conn().is_autocommit() {
            self.conn().execute("ROLLBACK", ()).await?;
        }
        Ok(())
    }
}
