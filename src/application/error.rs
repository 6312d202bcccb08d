use thiserror::Error;

use crate::domain::{
    DateError, InvalidTransaction, InvoiceId, ParseCentsError, TransactionId, TransactionStatus,
};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum AppError {
    /// Bad caller input: non-positive amount, empty recipient, unparseable date.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),

    #[error("Transaction {0} already has an invoice")]
    DuplicateInvoice(TransactionId),

    #[error("Transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Invoice {0} is already paid")]
    InvoiceAlreadyPaid(InvoiceId),

    #[error("Could not generate invoice for transaction {transaction_id}: {source}")]
    InvoiceGeneration {
        transaction_id: TransactionId,
        source: StorageError,
    },

    #[error("Could not pay invoice {invoice_id}: {source}")]
    PaymentFailed {
        invoice_id: InvoiceId,
        source: StorageError,
    },

    /// Batch billing stopped at `failed`; the invoices in `billed` were created before it.
    #[error("Billing stopped at transaction {failed} after {} invoice(s): {source}", .billed.len())]
    BatchAborted {
        billed: Vec<InvoiceId>,
        failed: TransactionId,
        source: Box<AppError>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AppError {
    /// True for errors caused by the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        match self {
            AppError::Validation(_)
            | AppError::TransactionNotFound(_)
            | AppError::InvoiceNotFound(_)
            | AppError::DuplicateInvoice(_)
            | AppError::InvalidTransition { .. }
            | AppError::InvoiceAlreadyPaid(_) => true,
            AppError::BatchAborted { source, .. } => source.is_client_error(),
            AppError::InvoiceGeneration { .. }
            | AppError::PaymentFailed { .. }
            | AppError::Storage(_) => false,
        }
    }
}

impl From<InvalidTransaction> for AppError {
    fn from(error: InvalidTransaction) -> Self {
        AppError::Validation(error.to_string())
    }
}

impl From<ParseCentsError> for AppError {
    fn from(error: ParseCentsError) -> Self {
        AppError::Validation(error.to_string())
    }
}

impl From<DateError> for AppError {
    fn from(error: DateError) -> Self {
        AppError::Validation(error.to_string())
    }
}
