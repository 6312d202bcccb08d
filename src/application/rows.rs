//! Shared SELECT lists and row decoders for the ledger tables.

use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;

use super::AppError;
use crate::domain::{Invoice, Payment, Transaction, TransactionId, TransactionStatus};
use crate::params;
use crate::storage::{LedgerStore, ScalarKind, StorageError, column, column_opt};

pub(crate) const SELECT_TRANSACTION: &str = "SELECT t.transaction_id, t.recipient, t.amount_cents, \
     t.description, t.created_at, t.status FROM transactions t";

/// Invoice columns followed by the billed transaction's columns.
pub(crate) const SELECT_INVOICE_DETAILS: &str = "SELECT i.invoice_id, i.transaction_id, \
     i.invoice_date, i.amount_cents AS invoice_amount_cents, i.is_paid, t.recipient, \
     t.amount_cents, t.description, t.created_at, t.status \
     FROM invoices i INNER JOIN transactions t ON t.transaction_id = i.transaction_id";

pub(crate) const SELECT_PAYMENT: &str =
    "SELECT p.payment_id, p.invoice_id, p.payment_date FROM payments p";

/// Load one transaction, or `TransactionNotFound`.
pub(crate) async fn fetch_transaction(
    store: &LedgerStore,
    id: TransactionId,
) -> Result<Transaction, AppError> {
    let sql = format!("{} WHERE t.transaction_id = ?", SELECT_TRANSACTION);
    let mut rows = store.query_many(&sql, params![id]);
    match rows.try_next().await? {
        Some(row) => Ok(row_to_transaction(&row)?),
        None => Err(AppError::TransactionNotFound(id)),
    }
}

pub(crate) fn row_to_transaction(row: &SqliteRow) -> Result<Transaction, StorageError> {
    Ok(Transaction {
        id: column(row, "transaction_id")?,
        recipient: column(row, "recipient")?,
        amount_cents: column(row, "amount_cents")?,
        description: column_opt(row, "description")?,
        created_at: column(row, "created_at")?,
        status: status_column(row, "status")?,
    })
}

pub(crate) fn row_to_invoice(row: &SqliteRow) -> Result<Invoice, StorageError> {
    Ok(Invoice {
        id: column(row, "invoice_id")?,
        transaction_id: column(row, "transaction_id")?,
        invoice_date: column(row, "invoice_date")?,
        amount_cents: column(row, "invoice_amount_cents")?,
        is_paid: column(row, "is_paid")?,
    })
}

pub(crate) fn row_to_payment(row: &SqliteRow) -> Result<Payment, StorageError> {
    Ok(Payment {
        id: column(row, "payment_id")?,
        invoice_id: column(row, "invoice_id")?,
        payment_date: column(row, "payment_date")?,
    })
}

pub(crate) fn status_column(row: &SqliteRow, name: &str) -> Result<TransactionStatus, StorageError> {
    let code: i64 = column(row, name)?;
    TransactionStatus::from_code(code).ok_or_else(|| StorageError::TypeCoercion {
        expected: ScalarKind::Integer,
        found: format!("unknown status code {}", code),
    })
}

/// An `INSERT ... RETURNING` that produced no row.
pub(crate) fn missing_returned_id() -> StorageError {
    StorageError::Sql(sqlx::Error::RowNotFound)
}
