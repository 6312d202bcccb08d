use std::future::Future;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, instrument};

use super::error::is_lock_contention;
use super::{FromScalar, SCHEMA, SqlParam, StorageError, column_opt};

/// Default per-operation deadline.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(40);

/// Rows produced one at a time by [`LedgerStore::query_many`].
pub type RowStream<'a> = BoxStream<'a, Result<SqliteRow, StorageError>>;

/// Durable store for transactions, invoices, payments and status codes.
///
/// Cloning is cheap and shares the underlying connection pool, so one store
/// can be handed to every manager.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
    command_timeout: Duration,
}

impl LedgerStore {
    /// Wrap an existing pool.
    pub fn new(pool: SqlitePool, command_timeout: Duration) -> Self {
        Self {
            pool,
            command_timeout,
        }
    }

    /// Open (creating if needed) the SQLite file at `path`.
    ///
    /// This does not create the schema; call [`LedgerStore::initialize`].
    pub async fn open(path: impl AsRef<Path>, command_timeout: Duration) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Init(format!("cannot create directory {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(command_timeout);

        let pool = SqlitePoolOptions::new()
            .acquire_timeout(command_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Init(format!("cannot open {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "opened ledger store");
        Ok(Self::new(pool, command_timeout))
    }

    /// A private in-memory store. Everything is lost when the store is dropped.
    pub async fn in_memory(command_timeout: Duration) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true)
            .busy_timeout(command_timeout);

        // Each connection would see its own empty database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(command_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Init(format!("cannot open in-memory store: {}", e)))?;

        Ok(Self::new(pool, command_timeout))
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Ensure the schema and status codes exist. Safe to call on every start.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        self.initialize_with(SCHEMA).await
    }

    /// Run a custom schema script.
    #[instrument(skip_all)]
    pub async fn initialize_with(&self, script: &str) -> Result<(), StorageError> {
        if script.trim().is_empty() {
            return Err(StorageError::Init("schema script is empty".to_string()));
        }

        with_deadline(
            self.command_timeout,
            sqlx::raw_sql(script).execute(&self.pool),
        )
        .await
        .map_err(|e| match e {
            StorageError::Timeout(_) => e,
            other => StorageError::Init(format!("schema script failed: {}", other)),
        })?;

        debug!("ledger schema is up to date");
        Ok(())
    }

    /// Run a mutating statement and return the number of affected rows.
    pub async fn execute(&self, statement: &str, params: Vec<SqlParam>) -> Result<u64, StorageError> {
        debug!(statement, "execute");
        let result = with_deadline(
            self.command_timeout,
            bind_params(sqlx::query(statement), params).execute(&self.pool),
        )
        .await?;
        Ok(result.rows_affected())
    }

    /// Return the first column of the first row decoded as `T`, or `None` when
    /// there is no row or the value is NULL.
    pub async fn query_one<T: FromScalar>(
        &self,
        statement: &str,
        params: Vec<SqlParam>,
    ) -> Result<Option<T>, StorageError> {
        debug!(statement, "query_one");
        let row = with_deadline(
            self.command_timeout,
            bind_params(sqlx::query(statement), params).fetch_optional(&self.pool),
        )
        .await?;
        first_column(row)
    }

    /// Stream the rows of a query without loading the whole result set.
    ///
    /// The stream is single-pass. The statement is released when the stream
    /// ends or is dropped, whichever comes first. Each row must arrive within
    /// the command timeout; a timeout ends the stream after yielding the error.
    pub fn query_many<'a>(&'a self, statement: &'a str, params: Vec<SqlParam>) -> RowStream<'a> {
        debug!(statement, "query_many");
        let rows = bind_params(sqlx::query(statement), params).fetch(&self.pool);
        with_row_deadline(rows, self.command_timeout)
    }

    /// Start an atomic unit of work.
    ///
    /// Dropping the returned handle without calling
    /// [`StoreTransaction::commit`] rolls everything back.
    pub async fn begin(&self) -> Result<StoreTransaction, StorageError> {
        let tx = with_deadline(self.command_timeout, self.pool.begin()).await?;
        Ok(StoreTransaction {
            tx,
            command_timeout: self.command_timeout,
        })
    }

    /// Close every connection. Further operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// A query that can be run any number of times, each run producing a fresh
/// single-pass [`RowStream`].
#[derive(Debug, Clone)]
pub struct RowQuery<'a> {
    statement: &'a str,
    params: Vec<SqlParam>,
}

impl<'a> RowQuery<'a> {
    pub fn new(statement: &'a str, params: Vec<SqlParam>) -> Self {
        Self { statement, params }
    }

    pub fn fetch<'s>(&'s self, store: &'s LedgerStore) -> RowStream<'s> {
        store.query_many(self.statement, self.params.clone())
    }
}

/// Handle to an open database transaction.
pub struct StoreTransaction {
    tx: Transaction<'static, Sqlite>,
    command_timeout: Duration,
}

impl StoreTransaction {
    pub async fn execute(
        &mut self,
        statement: &str,
        params: Vec<SqlParam>,
    ) -> Result<u64, StorageError> {
        debug!(statement, "execute in transaction");
        let result = with_deadline(
            self.command_timeout,
            bind_params(sqlx::query(statement), params).execute(&mut *self.tx),
        )
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn query_one<T: FromScalar>(
        &mut self,
        statement: &str,
        params: Vec<SqlParam>,
    ) -> Result<Option<T>, StorageError> {
        debug!(statement, "query_one in transaction");
        let row = with_deadline(
            self.command_timeout,
            bind_params(sqlx::query(statement), params).fetch_optional(&mut *self.tx),
        )
        .await?;
        first_column(row)
    }

    pub async fn commit(self) -> Result<(), StorageError> {
        with_deadline(self.command_timeout, self.tx.commit()).await
    }

    pub async fn rollback(self) -> Result<(), StorageError> {
        with_deadline(self.command_timeout, self.tx.rollback()).await
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: Vec<SqlParam>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<i64>),
            SqlParam::Integer(value) => query.bind(value),
            SqlParam::Real(value) => query.bind(value),
            SqlParam::Text(value) => query.bind(value),
        };
    }
    query
}

fn first_column<T: FromScalar>(row: Option<SqliteRow>) -> Result<Option<T>, StorageError> {
    match row {
        Some(row) => column_opt(&row, 0),
        None => Ok(None),
    }
}

async fn with_deadline<T, F>(deadline: Duration, operation: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(sqlx::Error::PoolTimedOut)) | Err(_) => Err(StorageError::Timeout(deadline)),
        Ok(Err(error)) if is_lock_contention(&error) => Err(StorageError::Timeout(deadline)),
        Ok(Err(error)) => Err(error.into()),
    }
}

fn with_row_deadline<'a>(
    rows: BoxStream<'a, Result<SqliteRow, sqlx::Error>>,
    deadline: Duration,
) -> RowStream<'a> {
    stream::unfold(Some(rows), move |state| async move {
        let mut rows = state?;
        match tokio::time::timeout(deadline, rows.next()).await {
            Ok(Some(Ok(row))) => Some((Ok(row), Some(rows))),
            Ok(Some(Err(sqlx::Error::PoolTimedOut))) | Err(_) => {
                Some((Err(StorageError::Timeout(deadline)), None))
            }
            Ok(Some(Err(error))) if is_lock_contention(&error) => {
                Some((Err(StorageError::Timeout(deadline)), None))
            }
            Ok(Some(Err(error))) => Some((Err(error.into()), None)),
            Ok(None) => None,
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use futures::TryStreamExt;

    use super::*;
    use crate::params;
    use crate::storage::column;

    async fn store() -> LedgerStore {
        let store = LedgerStore::in_memory(DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        store.initialize().await.unwrap();
        store
    }

    async fn insert_transaction(store: &LedgerStore, recipient: &str, cents: i64) -> i64 {
        store
            .query_one::<i64>(
                "INSERT INTO transactions (recipient, amount_cents, created_at, status) \
                 VALUES (?, ?, '2024-01-15 10:00:00', 1) RETURNING transaction_id",
                params![recipient, cents],
            )
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_codes_are_seeded() {
        let store = store().await;
        let labels: Vec<(i64, String)> = store
            .query_many("SELECT key, value FROM transaction_status ORDER BY key", params![])
            .map_ok(|row| {
                (
                    column::<i64, _>(&row, 0).unwrap(),
                    column::<String, _>(&row, 1).unwrap(),
                )
            })
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            labels,
            vec![
                (1, "Pending".to_string()),
                (2, "Billed".to_string()),
                (3, "Paid".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_initialize_twice_keeps_data() {
        let store = store().await;
        insert_transaction(&store, "Acme", 500).await;

        store.initialize().await.unwrap();

        let count = store
            .query_one::<i64>("SELECT COUNT(*) FROM transactions", params![])
            .await
            .unwrap();
        assert_eq!(count, Some(1));
        let statuses = store
            .query_one::<i64>("SELECT COUNT(*) FROM transaction_status", params![])
            .await
            .unwrap();
        assert_eq!(statuses, Some(3));
    }

    #[tokio::test]
    async fn test_malformed_schema_is_an_init_error() {
        let store = LedgerStore::in_memory(DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();

        let err = store.initialize_with("CREATE TABLE (").await.unwrap_err();
        assert!(matches!(err, StorageError::Init(_)));

        let err = store.initialize_with("  \n").await.unwrap_err();
        assert!(matches!(err, StorageError::Init(_)));
    }

    #[tokio::test]
    async fn test_query_one_coerces_text() {
        let store = store().await;

        let n = store.query_one::<i64>("SELECT '42'", params![]).await.unwrap();
        assert_eq!(n, Some(42));

        let n = store.query_one::<i32>("SELECT 7", params![]).await.unwrap();
        assert_eq!(n, Some(7));

        let ts = store
            .query_one::<NaiveDateTime>("SELECT '2024-01-31 23:59:59'", params![])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ts.to_string(), "2024-01-31 23:59:59");

        let err = store
            .query_one::<i64>("SELECT 'not a number'", params![])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TypeCoercion { .. }));
    }

    #[tokio::test]
    async fn test_query_one_without_rows_or_with_null() {
        let store = store().await;

        let none = store
            .query_one::<i64>("SELECT transaction_id FROM transactions WHERE transaction_id = ?", params![99_i64])
            .await
            .unwrap();
        assert_eq!(none, None);

        let null = store
            .query_one::<i64>("SELECT MAX(transaction_id) FROM transactions", params![])
            .await
            .unwrap();
        assert_eq!(null, None);
    }

    #[tokio::test]
    async fn test_execute_reports_affected_rows() {
        let store = store().await;
        let id = insert_transaction(&store, "Acme", 500).await;

        let changed = store
            .execute("UPDATE transactions SET status = 2 WHERE transaction_id = ?", params![id])
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let changed = store
            .execute("UPDATE transactions SET status = 2 WHERE transaction_id = ?", params![id + 1])
            .await
            .unwrap();
        assert_eq!(changed, 0);
    }

    #[tokio::test]
    async fn test_constraint_violations_are_classified() {
        let store = store().await;

        let err = store
            .execute(
                "INSERT INTO invoices (transaction_id, invoice_date, amount_cents) VALUES (?, '2024-01-01 00:00:00', 100)",
                params![12345_i64],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ForeignKeyViolation(_)));

        let id = insert_transaction(&store, "Acme", 500).await;
        let insert = "INSERT INTO invoices (transaction_id, invoice_date, amount_cents) VALUES (?, '2024-01-01 00:00:00', 500)";
        store.execute(insert, params![id]).await.unwrap();
        let err = store.execute(insert, params![id]).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_query_many_streams_in_insertion_order() {
        let store = store().await;
        for (name, cents) in [("a", 100), ("b", 200), ("c", 300)] {
            insert_transaction(&store, name, cents).await;
        }

        let mut rows = store.query_many(
            "SELECT recipient FROM transactions ORDER BY transaction_id",
            params![],
        );
        let first = rows.try_next().await.unwrap().unwrap();
        assert_eq!(column::<String, _>(&first, 0).unwrap(), "a");
        // Dropping early releases the statement
        drop(rows);

        let query = RowQuery::new("SELECT amount_cents FROM transactions ORDER BY transaction_id", params![]);
        for _ in 0..2 {
            let amounts: Vec<i64> = query
                .fetch(&store)
                .map_ok(|row| column::<i64, _>(&row, 0).unwrap())
                .try_collect()
                .await
                .unwrap();
            assert_eq!(amounts, vec![100, 200, 300]);
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = store().await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.execute(
                "INSERT INTO transactions (recipient, amount_cents, created_at) VALUES ('Acme', 100, '2024-01-01 00:00:00')",
                params![],
            )
            .await
            .unwrap();
            // No commit
        }

        let count = store
            .query_one::<i64>("SELECT COUNT(*) FROM transactions", params![])
            .await
            .unwrap();
        assert_eq!(count, Some(0));
    }

    #[tokio::test]
    async fn test_commit_and_explicit_rollback() {
        let store = store().await;
        let insert = "INSERT INTO transactions (recipient, amount_cents, created_at) VALUES (?, 100, '2024-01-01 00:00:00')";

        let mut tx = store.begin().await.unwrap();
        tx.execute(insert, params!["kept"]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.execute(insert, params!["discarded"]).await.unwrap();
        let inside = tx
            .query_one::<i64>("SELECT COUNT(*) FROM transactions", params![])
            .await
            .unwrap();
        assert_eq!(inside, Some(2));
        tx.rollback().await.unwrap();

        let names: Vec<String> = store
            .query_many("SELECT recipient FROM transactions", params![])
            .map_ok(|row| column::<String, _>(&row, 0).unwrap())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_store_fails() {
        let store = store().await;
        store.close().await;

        let err = store.execute("SELECT 1", params![]).await.unwrap_err();
        assert!(matches!(err, StorageError::Sql(_)));
    }
}
