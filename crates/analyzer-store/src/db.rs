use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use analyzer_core::AnalysisError;

/// Keyed document store over SQLite.
///
/// Every stage writes only its own table, and every write is an upsert by
/// the record key, so re-running any stage for the same week is a no-op on
/// top of its previous output. No cross-stage locking exists or is needed.
#[derive(Clone)]
pub struct DocStore {
    pool: SqlitePool,
}

impl DocStore {
    /// Open (creating if missing) and bootstrap the schema.
    pub async fn new(database_url: &str) -> Result<Self, AnalysisError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(store_err)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> Result<Self, AnalysisError> {
        Self::new("sqlite::memory:").await
    }

    async fn init_schema(&self) -> Result<(), AnalysisError> {
        let schema = include_str!("../schema.sql");
        // sqlx executes one statement at a time
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt)
                    .execute(&self.pool)
                    .await
                    .map_err(store_err)?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn store_err<E: std::fmt::Display>(e: E) -> AnalysisError {
    AnalysisError::Store(e.to_string())
}
