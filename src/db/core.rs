use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Sqlite,
};
use std::str::FromStr;
use tokio::time::Duration;
use tracing::{info, instrument};

use crate::TARGET_DB;

#[derive(Clone, Debug)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Get access to the database pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

/// Helper to recognise SQLite busy/locked errors, which are worth retrying.
pub trait DbLockErrorExt {
    fn is_database_lock_error(&self) -> bool;
}

impl DbLockErrorExt for sqlx::Error {
    fn is_database_lock_error(&self) -> bool {
        match self {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            sqlx::Error::Database(err) => err
                .code()
                .map_or(false, |code| code == "5" || code == "6"),
            _ => false,
        }
    }
}

impl Database {
    /// Opens (creating if needed) the index database at `database_path`.
    ///
    /// Commits use `synchronous=FULL`, so once a write transaction returns the
    /// data survives a process restart.
    #[instrument(target = "db_query", level = "info")]
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        info!(target: TARGET_DB, "Creating database pool for: {}", database_path);

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        info!(target: TARGET_DB, "Database pool created");

        let db = Database { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Collect row counts for a quick health summary.
    pub async fn collect_stats(&self) -> Result<(i64, Option<String>), sqlx::Error> {
        let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries")
            .fetch_one(self.pool())
            .await?;
        let model = self.get_meta(super::index::META_EMBEDDING_MODEL).await?;
        Ok((entries, model))
    }
}
