use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{Cents, Transaction, TransactionId};

pub type InvoiceId = i64;
pub type PaymentId = i64;

/// A billing document generated from exactly one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    /// The billed transaction; at most one invoice exists per transaction
    pub transaction_id: TransactionId,
    pub invoice_date: NaiveDateTime,
    /// Copy of the transaction amount at billing time, never recomputed
    pub amount_cents: Cents,
    pub is_paid: bool,
}

/// An invoice together with the transaction it bills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDetails {
    pub invoice: Invoice,
    pub transaction: Transaction,
}

/// Record that an invoice has been settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub invoice_id: InvoiceId,
    pub payment_date: NaiveDateTime,
}
