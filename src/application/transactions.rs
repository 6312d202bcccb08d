use std::sync::Arc;

use futures::TryStreamExt;
use tracing::{info, instrument};

use super::AppError;
use super::rows::{
    SELECT_TRANSACTION, fetch_transaction, missing_returned_id, row_to_transaction,
};
use crate::domain::{
    Cents, Clock, DateRange, NewTransaction, SystemClock, Transaction, TransactionId,
    TransactionStatus, parse_cents,
};
use crate::params;
use crate::storage::{LedgerStore, RowStream};

/// Registers transactions and reads them back.
///
/// New transactions always start as Pending. Status changes belong to the
/// invoice flow; this manager never writes them.
#[derive(Clone)]
pub struct TransactionManager {
    store: LedgerStore,
    clock: Arc<dyn Clock>,
}

impl TransactionManager {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for creation timestamps.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Record a new Pending transaction.
    #[instrument(skip(self, description))]
    pub async fn register_transaction(
        &self,
        recipient: &str,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<Transaction, AppError> {
        let new = NewTransaction::new(recipient, amount_cents, description)?;
        let created_at = self.clock.now();

        let id = self
            .store
            .query_one::<i64>(
                "INSERT INTO transactions (recipient, amount_cents, description, created_at, status) \
                 VALUES (?, ?, ?, ?, ?) RETURNING transaction_id",
                params![
                    new.recipient(),
                    new.amount_cents(),
                    new.description(),
                    created_at,
                    TransactionStatus::Pending.code(),
                ],
            )
            .await?
            .ok_or_else(missing_returned_id)?;

        info!(id, amount_cents, "registered transaction");
        Ok(new.into_transaction(id, created_at))
    }

    /// Like [`register_transaction`](Self::register_transaction), taking the
    /// amount as decimal text (e.g. `"125.50"`).
    pub async fn register_from_input(
        &self,
        recipient: &str,
        amount: &str,
        description: Option<String>,
    ) -> Result<Transaction, AppError> {
        let amount_cents = parse_cents(amount)?;
        self.register_transaction(recipient, amount_cents, description)
            .await
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, AppError> {
        fetch_transaction(&self.store, id).await
    }

    /// All transactions in insertion order.
    pub async fn list_transactions(&self) -> Result<Vec<Transaction>, AppError> {
        let sql = format!("{} ORDER BY t.transaction_id", SELECT_TRANSACTION);
        collect_transactions(self.store.query_many(&sql, params![])).await
    }

    /// Pending transactions created from the start of `range.start()` through the
    /// end of `range.end()`, in insertion order. Billed and paid transactions are
    /// never reported here.
    pub async fn list_pending_between(
        &self,
        range: DateRange,
    ) -> Result<Vec<Transaction>, AppError> {
        let sql = format!(
            "{} WHERE t.created_at >= ? AND t.created_at < ? AND t.status = ? \
             ORDER BY t.transaction_id",
            SELECT_TRANSACTION
        );
        let params = params![
            range.lower_bound(),
            range.upper_bound_exclusive(),
            TransactionStatus::Pending.code(),
        ];
        collect_transactions(self.store.query_many(&sql, params)).await
    }

    /// Range query from `dd-MMM-yyyy` text, e.g. `("01-Jan-2024", "15-Jan-2024")`.
    pub async fn list_pending_in_report_range(
        &self,
        start: &str,
        end: &str,
    ) -> Result<Vec<Transaction>, AppError> {
        let range = DateRange::parse(start, end)?;
        self.list_pending_between(range).await
    }
}

async fn collect_transactions(mut rows: RowStream<'_>) -> Result<Vec<Transaction>, AppError> {
    let mut transactions = Vec::new();
    while let Some(row) = rows.try_next().await? {
        transactions.push(row_to_transaction(&row)?);
    }
    Ok(transactions)
}
