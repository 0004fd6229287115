//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Database wrapper for a local libSQL file
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        tracing::debug!("Opened local queue database at {}", path.as_ref().display());
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` pragmas
    async fn configure(&self) -> Result<()> {
        // In-memory databases reject WAL; ignore
        self.pragma("PRAGMA journal_mode = WAL;").await.ok();
        // Other processes may hold the write lock on the same file
        self.pragma(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"))
            .await?;
        // Queued writes must survive power loss, not only process crashes
        self.conn.execute("PRAGMA synchronous = FULL;", ()).await?;
        Ok(())
    }

    /// Run a pragma that answers with a row
    async fn pragma(&self, statement: &str) -> Result<()> {
        let mut rows = self.conn.query(statement, ()).await?;
        while rows.next().await?.is_some() {}
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
