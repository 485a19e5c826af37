// SPDX-License-Identifier: Apache-2.0

//! SQLite backend
//!
//! One [`SqliteDatabase`] owns the pool shared by the proposal table and any
//! target tables. While a transaction is open every statement is routed to
//! the dedicated transaction connection so proposals written mid-transaction
//! land in the same unit of work as the caller's own writes.

mod proposals;
mod records;

pub use proposals::SqliteProposalStore;
pub use records::SqliteRecordStore;

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteQueryResult, SqliteRow,
};
use sqlx::{Column, Row, TypeInfo};
use tokio::sync::Mutex;
use tracing::{debug, info};

use bouncer_core::{BouncerError, BouncerResult, UnitOfWork, Value};

pub(crate) type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Name of the proposal table
pub const PROPOSALS_TABLE: &str = "bouncer_records";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS bouncer_records (
        id TEXT PRIMARY KEY NOT NULL,
        source TEXT NOT NULL,
        primary_key TEXT NULL,
        proposer_id TEXT NOT NULL,
        reviewer_id TEXT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        payload TEXT NOT NULL,
        original_payload TEXT NULL,
        reason TEXT NULL,
        reviewed_at TEXT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_bouncer_records_status ON bouncer_records (status)",
    "CREATE INDEX IF NOT EXISTS idx_bouncer_records_source ON bouncer_records (source)",
    "CREATE INDEX IF NOT EXISTS idx_bouncer_records_primary_key ON bouncer_records (primary_key)",
    "CREATE INDEX IF NOT EXISTS idx_bouncer_records_proposer ON bouncer_records (proposer_id)",
    "CREATE INDEX IF NOT EXISTS idx_bouncer_records_reviewer ON bouncer_records (reviewer_id)",
    "CREATE INDEX IF NOT EXISTS idx_bouncer_records_created ON bouncer_records (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_bouncer_records_lookup
        ON bouncer_records (source, primary_key, status)",
];

pub(crate) fn storage_err(e: sqlx::Error) -> BouncerError {
    BouncerError::storage(e.to_string())
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Connection pool plus the connection pinned by an open transaction
pub struct SqliteDatabase {
    pool: SqlitePool,
    transaction_conn: Mutex<Option<PoolConnection<Sqlite>>>,
}

impl SqliteDatabase {
    /// Opens (or creates) a database file. `":memory:"` gives a private
    /// in-memory database backed by a single connection.
    pub async fn connect(path: &str) -> BouncerResult<Self> {
        let in_memory = path == ":memory:";
        let opts = Self::build_connect_options(path, in_memory)?;

        let pool_opts = if in_memory {
            // Every new connection to :memory: would see an empty database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_opts
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(opts)
            .await
            .map_err(|e| BouncerError::storage(format!("Failed to open {}: {}", path, e)))?;

        info!(path, "SQLite database opened");
        Ok(Self {
            pool,
            transaction_conn: Mutex::new(None),
        })
    }

    /// Opens the database and creates the proposal table if needed.
    pub async fn open(path: &str) -> BouncerResult<Self> {
        let db = Self::connect(path).await?;
        db.migrate().await?;
        Ok(db)
    }

    fn build_connect_options(path: &str, in_memory: bool) -> BouncerResult<SqliteConnectOptions> {
        let path = path.trim();
        if path.is_empty() {
            return Err(BouncerError::config("SQLite path cannot be empty"));
        }

        if in_memory {
            return SqliteConnectOptions::from_str("sqlite::memory:").map_err(storage_err);
        }

        Ok(SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30)))
    }

    /// Creates the proposal table and its indexes.
    pub async fn migrate(&self) -> BouncerResult<()> {
        for statement in SCHEMA {
            self.execute(sqlx::query(statement)).await?;
        }
        debug!(table = PROPOSALS_TABLE, "Schema ready");
        Ok(())
    }

    /// Runs a batch of semicolon separated statements, e.g. to create the
    /// target tables of an application.
    pub async fn execute_script(&self, sql: &str) -> BouncerResult<()> {
        let mut tx_guard = self.transaction_conn.lock().await;
        let result = if let Some(ref mut conn) = *tx_guard {
            sqlx::raw_sql(sql).execute(&mut **conn).await
        } else {
            sqlx::raw_sql(sql).execute(&self.pool).await
        };
        result.map(|_| ()).map_err(storage_err)
    }

    pub(crate) async fn execute(&self, query: SqliteQuery<'_>) -> BouncerResult<SqliteQueryResult> {
        let mut tx_guard = self.transaction_conn.lock().await;
        let result = if let Some(ref mut conn) = *tx_guard {
            query.execute(&mut **conn).await
        } else {
            query.execute(&self.pool).await
        };
        result.map_err(storage_err)
    }

    pub(crate) async fn fetch_all(&self, query: SqliteQuery<'_>) -> BouncerResult<Vec<SqliteRow>> {
        let mut tx_guard = self.transaction_conn.lock().await;
        let result = if let Some(ref mut conn) = *tx_guard {
            query.fetch_all(&mut **conn).await
        } else {
            query.fetch_all(&self.pool).await
        };
        result.map_err(storage_err)
    }

    pub(crate) async fn fetch_optional(
        &self,
        query: SqliteQuery<'_>,
    ) -> BouncerResult<Option<SqliteRow>> {
        let mut tx_guard = self.transaction_conn.lock().await;
        let result = if let Some(ref mut conn) = *tx_guard {
            query.fetch_optional(&mut **conn).await
        } else {
            query.fetch_optional(&self.pool).await
        };
        result.map_err(storage_err)
    }

    /// Number of rows in a table
    pub async fn count(&self, table: &str) -> BouncerResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row = self
            .fetch_optional(sqlx::query(&sql))
            .await?
            .ok_or_else(|| BouncerError::internal("COUNT returned no row"))?;
        row.try_get::<i64, _>(0).map_err(storage_err)
    }

    pub async fn close(&self) {
        if let Some(mut conn) = self.transaction_conn.lock().await.take() {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
        }
        self.pool.close().await;
    }
}

#[async_trait]
impl UnitOfWork for SqliteDatabase {
    async fn begin(&self) -> BouncerResult<()> {
        let mut tx = self.transaction_conn.lock().await;

        if tx.is_some() {
            return Err(BouncerError::transaction_error(
                "A transaction is already active",
            ));
        }

        let mut conn = self.pool.acquire().await.map_err(|e| {
            BouncerError::transaction_error(format!(
                "Failed to acquire connection for transaction: {}",
                e
            ))
        })?;

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                BouncerError::transaction_error(format!("Failed to begin transaction: {}", e))
            })?;

        *tx = Some(conn);
        Ok(())
    }

    async fn commit(&self) -> BouncerResult<()> {
        let mut tx = self.transaction_conn.lock().await;

        let mut conn = tx
            .take()
            .ok_or_else(|| BouncerError::transaction_error("No active transaction to commit"))?;

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                BouncerError::transaction_error(format!("Failed to commit transaction: {}", e))
            })?;

        Ok(())
    }

    async fn rollback(&self) -> BouncerResult<()> {
        let mut tx = self.transaction_conn.lock().await;

        let mut conn = tx
            .take()
            .ok_or_else(|| BouncerError::transaction_error("No active transaction to rollback"))?;

        sqlx::query("ROLLBACK")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                BouncerError::transaction_error(format!("Failed to rollback transaction: {}", e))
            })?;

        Ok(())
    }

    async fn in_progress(&self) -> bool {
        self.transaction_conn.lock().await.is_some()
    }
}

/// Binds a field value. Nested values are stored as JSON text.
pub(crate) fn bind_value<'q>(query: SqliteQuery<'q>, value: &'q Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Array(_) | Value::Map(_) => query.bind(value.to_json_string()),
    }
}

/// Reads a column back into a [`Value`]
///
/// Columns declared `BOOLEAN` decode as booleans. Otherwise SQLite is
/// dynamically typed, so types are tried in order of likelihood.
pub(crate) fn extract_value(row: &SqliteRow, idx: usize) -> Value {
    let declared_bool = row
        .columns()
        .get(idx)
        .map(|col| col.type_info().name().eq_ignore_ascii_case("BOOLEAN"))
        .unwrap_or(false);
    if declared_bool {
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
    }

    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::Float).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::Text).unwrap_or(Value::Null);
    }

    Value::Null
}
