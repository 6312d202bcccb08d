//! Read-only views over the ledger, shaped for display and export.

use chrono::NaiveDateTime;
use futures::TryStreamExt;
use serde::Serialize;

use super::AppError;
use super::rows::{SELECT_INVOICE_DETAILS, SELECT_TRANSACTION, row_to_invoice, row_to_transaction};
use crate::domain::{Cents, DateRange, Invoice, Transaction, TransactionStatus};
use crate::storage::{LedgerStore, SqlParam, column, column_opt};

/// A row of the status lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLabel {
    pub code: i64,
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    /// Matches on `created_at`, whole days inclusive.
    pub range: Option<DateRange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub status_label: String,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub paid: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub recipient: String,
    pub description: Option<String>,
    pub payment_date: Option<NaiveDateTime>,
}

/// Totals per status and outstanding billed amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub pending_count: i64,
    pub pending_cents: Cents,
    pub billed_count: i64,
    pub billed_cents: Cents,
    pub paid_count: i64,
    pub paid_cents: Cents,
    pub invoice_count: i64,
    pub unpaid_invoice_cents: Cents,
}

#[derive(Debug, Clone)]
pub struct QueryFacade {
    store: LedgerStore,
}

impl QueryFacade {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    pub async fn status_labels(&self) -> Result<Vec<StatusLabel>, AppError> {
        let mut rows = self.store.query_many(
            "SELECT key, value FROM transaction_status ORDER BY key",
            Vec::new(),
        );
        let mut labels = Vec::new();
        while let Some(row) = rows.try_next().await? {
            labels.push(StatusLabel {
                code: column(&row, "key")?,
                label: column(&row, "value")?,
            });
        }
        Ok(labels)
    }

    pub async fn transaction_listing(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<TransactionView>, AppError> {
        let mut sql = format!(
            "{} INNER JOIN transaction_status s ON s.key = t.status WHERE 1=1",
            SELECT_TRANSACTION.replacen(" FROM", ", s.value AS status_label FROM", 1)
        );
        let mut params: Vec<SqlParam> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND t.status = ?");
            params.push(status.code().into());
        }
        if let Some(range) = filter.range {
            sql.push_str(" AND t.created_at >= ? AND t.created_at < ?");
            params.push(range.lower_bound().into());
            params.push(range.upper_bound_exclusive().into());
        }
        sql.push_str(" ORDER BY t.transaction_id");

        let mut rows = self.store.query_many(&sql, params);
        let mut views = Vec::new();
        while let Some(row) = rows.try_next().await? {
            views.push(TransactionView {
                transaction: row_to_transaction(&row)?,
                status_label: column(&row, "status_label")?,
            });
        }
        Ok(views)
    }

    pub async fn invoice_listing(
        &self,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceView>, AppError> {
        let mut sql = format!(
            "{} LEFT JOIN payments p ON p.invoice_id = i.invoice_id WHERE 1=1",
            SELECT_INVOICE_DETAILS.replacen(" FROM", ", p.payment_date FROM", 1)
        );
        let mut params: Vec<SqlParam> = Vec::new();

        if let Some(paid) = filter.paid {
            sql.push_str(" AND i.is_paid = ?");
            params.push(paid.into());
        }
        sql.push_str(" ORDER BY i.invoice_id");

        let mut rows = self.store.query_many(&sql, params);
        let mut views = Vec::new();
        while let Some(row) = rows.try_next().await? {
            let transaction = row_to_transaction(&row)?;
            views.push(InvoiceView {
                invoice: row_to_invoice(&row)?,
                recipient: transaction.recipient,
                description: transaction.description,
                payment_date: column_opt(&row, "payment_date")?,
            });
        }
        Ok(views)
    }

    pub async fn summary(&self) -> Result<LedgerSummary, AppError> {
        let mut summary = LedgerSummary::default();

        {
            let mut rows = self.store.query_many(
                "SELECT status, COUNT(*) AS n, COALESCE(SUM(amount_cents), 0) AS total \
                 FROM transactions GROUP BY status",
                Vec::new(),
            );
            while let Some(row) = rows.try_next().await? {
                let code: i64 = column(&row, "status")?;
                let count: i64 = column(&row, "n")?;
                let total: i64 = column(&row, "total")?;
                match TransactionStatus::from_code(code) {
                    Some(TransactionStatus::Pending) => {
                        summary.pending_count = count;
                        summary.pending_cents = total;
                    }
                    Some(TransactionStatus::Billed) => {
                        summary.billed_count = count;
                        summary.billed_cents = total;
                    }
                    Some(TransactionStatus::Paid) => {
                        summary.paid_count = count;
                        summary.paid_cents = total;
                    }
                    // Unknown codes stay out of the totals
                    None => {}
                }
            }
        }

        summary.invoice_count = self
            .store
            .query_one::<i64>("SELECT COUNT(*) FROM invoices", Vec::new())
            .await?
            .unwrap_or(0);
        summary.unpaid_invoice_cents = self
            .store
            .query_one::<i64>(
                "SELECT COALESCE(SUM(amount_cents), 0) FROM invoices WHERE is_paid = 0",
                Vec::new(),
            )
            .await?
            .unwrap_or(0);

        Ok(summary)
    }
}
