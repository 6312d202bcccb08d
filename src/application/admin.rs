use tracing::warn;

use super::AppError;
use crate::domain::{TransactionId, TransactionStatus};
use crate::params;
use crate::storage::LedgerStore;

/// Manual status correction, outside the billing state machine.
///
/// Nothing here checks that the new status is consistent with the invoices and
/// payments on record. Regular flows go through
/// [`InvoiceManager`](super::InvoiceManager).
#[derive(Debug, Clone)]
pub struct AdminOverride {
    store: LedgerStore,
}

impl AdminOverride {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Force the status code of a transaction. Returns false if no transaction has `id`.
    pub async fn override_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<bool, AppError> {
        let changed = self
            .store
            .execute(
                "UPDATE transactions SET status = ? WHERE transaction_id = ?",
                params![status.code(), id],
            )
            .await?;

        if changed > 0 {
            warn!(id, status = %status, "transaction status overridden");
        }
        Ok(changed > 0)
    }
}
