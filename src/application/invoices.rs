use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::TryStreamExt;
use tracing::{error, info, instrument, warn};

use super::AppError;
use super::rows::{
    SELECT_INVOICE_DETAILS, SELECT_PAYMENT, fetch_transaction, missing_returned_id,
    row_to_invoice, row_to_payment, row_to_transaction, status_column,
};
use crate::domain::{
    Clock, Invoice, InvoiceDetails, InvoiceId, Payment, SystemClock, Transaction, TransactionId,
    TransactionStatus,
};
use crate::params;
use crate::storage::{LedgerStore, StorageError, StoreTransaction, column};

/// Bills transactions and records payments.
///
/// This is the only place that moves a transaction forward:
/// Pending -> Billed when an invoice is generated, Billed -> Paid when the
/// invoice is paid. Each of those steps is a single database transaction.
#[derive(Clone)]
pub struct InvoiceManager {
    store: LedgerStore,
    clock: Arc<dyn Clock>,
}

/// Why an atomic block did not commit.
enum BlockFailure {
    /// A guard inside the block found the rows in an unexpected state.
    Rejected(AppError),
    Storage(StorageError),
}

impl From<StorageError> for BlockFailure {
    fn from(error: StorageError) -> Self {
        BlockFailure::Storage(error)
    }
}

impl InvoiceManager {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for invoice and payment dates.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Create the invoice for a Pending transaction and mark it Billed.
    ///
    /// The invoice amount is copied from the transaction. Fails with
    /// `DuplicateInvoice` if the transaction already has an invoice, also when
    /// a concurrent caller billed it first.
    #[instrument(skip(self))]
    pub async fn generate_invoice_from_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Invoice, AppError> {
        let transaction = fetch_transaction(&self.store, transaction_id).await?;

        let existing = self
            .store
            .query_one::<i64>(
                "SELECT COUNT(*) FROM invoices WHERE transaction_id = ?",
                params![transaction_id],
            )
            .await?
            .unwrap_or(0);
        if existing > 0 {
            return Err(AppError::DuplicateInvoice(transaction_id));
        }
        if transaction.status != TransactionStatus::Pending {
            return Err(AppError::InvalidTransition {
                id: transaction_id,
                from: transaction.status,
                to: TransactionStatus::Billed,
            });
        }

        let invoice_date = self.clock.now();
        let mut tx = self.store.begin().await?;
        let outcome = bill(&mut tx, &transaction, invoice_date).await;

        match finish(tx, outcome).await {
            Ok(invoice_id) => {
                info!(invoice_id, transaction_id, "generated invoice");
                Ok(Invoice {
                    id: invoice_id,
                    transaction_id,
                    invoice_date,
                    amount_cents: transaction.amount_cents,
                    is_paid: false,
                })
            }
            Err(BlockFailure::Rejected(err)) => Err(err),
            // The UNIQUE constraint on invoices.transaction_id caught a concurrent biller
            Err(BlockFailure::Storage(StorageError::UniqueViolation(_))) => {
                warn!(transaction_id, "transaction was billed concurrently");
                Err(AppError::DuplicateInvoice(transaction_id))
            }
            Err(BlockFailure::Storage(source)) => {
                error!(transaction_id, error = %source, "invoice generation rolled back");
                Err(AppError::InvoiceGeneration {
                    transaction_id,
                    source,
                })
            }
        }
    }

    /// Bill several transactions in order, stopping at the first failure.
    ///
    /// Every transaction is billed in its own atomic step, so invoices created
    /// before the failure remain. They are listed in `BatchAborted::billed`.
    #[instrument(skip(self))]
    pub async fn generate_invoices(
        &self,
        transaction_ids: &[TransactionId],
    ) -> Result<Vec<Invoice>, AppError> {
        let mut invoices = Vec::with_capacity(transaction_ids.len());
        for &transaction_id in transaction_ids {
            match self.generate_invoice_from_transaction(transaction_id).await {
                Ok(invoice) => invoices.push(invoice),
                Err(err) => {
                    warn!(
                        transaction_id,
                        billed = invoices.len(),
                        remaining = transaction_ids.len() - invoices.len() - 1,
                        error = %err,
                        "batch billing aborted"
                    );
                    return Err(AppError::BatchAborted {
                        billed: invoices.iter().map(|i| i.id).collect(),
                        failed: transaction_id,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(invoices)
    }

    /// An invoice together with the transaction it bills.
    pub async fn get_invoice(&self, id: InvoiceId) -> Result<InvoiceDetails, AppError> {
        let sql = format!("{} WHERE i.invoice_id = ?", SELECT_INVOICE_DETAILS);
        let mut rows = self.store.query_many(&sql, params![id]);
        match rows.try_next().await? {
            Some(row) => Ok(InvoiceDetails {
                invoice: row_to_invoice(&row)?,
                transaction: row_to_transaction(&row)?,
            }),
            None => Err(AppError::InvoiceNotFound(id)),
        }
    }

    /// All invoices in creation order.
    pub async fn list_invoices(&self) -> Result<Vec<InvoiceDetails>, AppError> {
        let sql = format!("{} ORDER BY i.invoice_id", SELECT_INVOICE_DETAILS);
        let mut rows = self.store.query_many(&sql, params![]);
        let mut invoices = Vec::new();
        while let Some(row) = rows.try_next().await? {
            invoices.push(InvoiceDetails {
                invoice: row_to_invoice(&row)?,
                transaction: row_to_transaction(&row)?,
            });
        }
        Ok(invoices)
    }

    /// Settle an unpaid invoice: record the payment, flag the invoice paid and
    /// move its transaction to Paid, all or nothing.
    #[instrument(skip(self))]
    pub async fn pay(&self, invoice_id: InvoiceId) -> Result<Payment, AppError> {
        let sql = "SELECT i.transaction_id, i.is_paid, t.status FROM invoices i \
                   INNER JOIN transactions t ON t.transaction_id = i.transaction_id \
                   WHERE i.invoice_id = ?";
        let (transaction_id, is_paid, status) = {
            let mut rows = self.store.query_many(sql, params![invoice_id]);
            let row = rows
                .try_next()
                .await?
                .ok_or(AppError::InvoiceNotFound(invoice_id))?;
            let transaction_id: TransactionId = column(&row, "transaction_id")?;
            let is_paid: bool = column(&row, "is_paid")?;
            (transaction_id, is_paid, status_column(&row, "status")?)
        };

        if is_paid {
            return Err(AppError::InvoiceAlreadyPaid(invoice_id));
        }
        if status != TransactionStatus::Billed {
            return Err(AppError::InvalidTransition {
                id: transaction_id,
                from: status,
                to: TransactionStatus::Paid,
            });
        }

        let payment_date = self.clock.now();
        let mut tx = self.store.begin().await?;
        let outcome = settle(&mut tx, invoice_id, transaction_id, payment_date).await;

        match finish(tx, outcome).await {
            Ok(payment_id) => {
                info!(invoice_id, transaction_id, payment_id, "invoice paid");
                Ok(Payment {
                    id: payment_id,
                    invoice_id,
                    payment_date,
                })
            }
            Err(BlockFailure::Rejected(err)) => Err(err),
            // UNIQUE (invoice_id) on payments: someone else paid first
            Err(BlockFailure::Storage(StorageError::UniqueViolation(_))) => {
                Err(AppError::InvoiceAlreadyPaid(invoice_id))
            }
            Err(BlockFailure::Storage(source)) => {
                error!(invoice_id, error = %source, "payment rolled back");
                Err(AppError::PaymentFailed { invoice_id, source })
            }
        }
    }

    /// Payments recorded against an invoice, oldest first.
    pub async fn list_payments(&self, invoice_id: InvoiceId) -> Result<Vec<Payment>, AppError> {
        let sql = format!("{} WHERE p.invoice_id = ? ORDER BY p.payment_id", SELECT_PAYMENT);
        let mut rows = self.store.query_many(&sql, params![invoice_id]);
        let mut payments = Vec::new();
        while let Some(row) = rows.try_next().await? {
            payments.push(row_to_payment(&row)?);
        }
        Ok(payments)
    }
}

/// Insert the invoice and advance the transaction to Billed.
async fn bill(
    tx: &mut StoreTransaction,
    transaction: &Transaction,
    invoice_date: NaiveDateTime,
) -> Result<InvoiceId, BlockFailure> {
    let invoice_id = tx
        .query_one::<i64>(
            "INSERT INTO invoices (transaction_id, invoice_date, amount_cents, is_paid) \
             VALUES (?, ?, ?, 0) RETURNING invoice_id",
            params![transaction.id, invoice_date, transaction.amount_cents],
        )
        .await?
        .ok_or_else(missing_returned_id)?;

    let changed = tx
        .execute(
            "UPDATE transactions SET status = ? WHERE transaction_id = ? AND status = ?",
            params![
                TransactionStatus::Billed.code(),
                transaction.id,
                TransactionStatus::Pending.code(),
            ],
        )
        .await?;
    if changed != 1 {
        return Err(BlockFailure::Rejected(AppError::InvalidTransition {
            id: transaction.id,
            from: transaction.status,
            to: TransactionStatus::Billed,
        }));
    }

    Ok(invoice_id)
}

/// Record the payment, flag the invoice and advance the transaction to Paid.
async fn settle(
    tx: &mut StoreTransaction,
    invoice_id: InvoiceId,
    transaction_id: TransactionId,
    payment_date: NaiveDateTime,
) -> Result<i64, BlockFailure> {
    let payment_id = tx
        .query_one::<i64>(
            "INSERT INTO payments (invoice_id, payment_date) VALUES (?, ?) RETURNING payment_id",
            params![invoice_id, payment_date],
        )
        .await?
        .ok_or_else(missing_returned_id)?;

    let changed = tx
        .execute(
            "UPDATE invoices SET is_paid = 1 WHERE invoice_id = ? AND is_paid = 0",
            params![invoice_id],
        )
        .await?;
    if changed != 1 {
        return Err(BlockFailure::Rejected(AppError::InvoiceAlreadyPaid(
            invoice_id,
        )));
    }

    let changed = tx
        .execute(
            "UPDATE transactions SET status = ? WHERE transaction_id = ? AND status = ?",
            params![
                TransactionStatus::Paid.code(),
                transaction_id,
                TransactionStatus::Billed.code(),
            ],
        )
        .await?;
    if changed != 1 {
        return Err(BlockFailure::Rejected(AppError::InvalidTransition {
            id: transaction_id,
            from: TransactionStatus::Billed,
            to: TransactionStatus::Paid,
        }));
    }

    Ok(payment_id)
}

/// Commit on success, roll back otherwise.
async fn finish<T>(
    tx: StoreTransaction,
    outcome: Result<T, BlockFailure>,
) -> Result<T, BlockFailure> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(failure) => {
            if let Err(rollback_error) = tx.rollback().await {
                // Dropping the handle still discards the changes
                warn!(error = %rollback_error, "explicit rollback failed");
            }
            Err(failure)
        }
    }
}
