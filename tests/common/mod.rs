// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use facturo::application::{AdminOverride, InvoiceManager, QueryFacade, TransactionManager};
use facturo::domain::{Cents, FixedClock, Transaction};
use facturo::storage::{DEFAULT_COMMAND_TIMEOUT, LedgerStore};
use tempfile::TempDir;

/// All managers over one freshly initialized store.
pub struct TestLedger {
    pub store: LedgerStore,
    pub transactions: TransactionManager,
    pub invoices: InvoiceManager,
    pub queries: QueryFacade,
    pub admin: AdminOverride,
}

impl TestLedger {
    /// Register a transaction as if it had been created at `created_at`.
    pub async fn register_at(
        &self,
        created_at: NaiveDateTime,
        recipient: &str,
        amount_cents: Cents,
    ) -> Result<Transaction> {
        let manager = TransactionManager::new(self.store.clone()).with_clock(FixedClock(created_at));
        Ok(manager
            .register_transaction(recipient, amount_cents, None)
            .await?)
    }
}

/// Helper to create a ledger backed by a temporary database file
pub async fn test_ledger() -> Result<(TestLedger, TempDir)> {
    let temp_dir = TempDir::new()?;
    let store = open_store(&temp_dir).await?;
    let clock = FixedClock(at(2024, 1, 20));

    let ledger = TestLedger {
        transactions: TransactionManager::new(store.clone()).with_clock(clock),
        invoices: InvoiceManager::new(store.clone()).with_clock(clock),
        queries: QueryFacade::new(store.clone()),
        admin: AdminOverride::new(store.clone()),
        store,
    };
    Ok((ledger, temp_dir))
}

/// Open and initialize the store file inside `dir`
pub async fn open_store(dir: &TempDir) -> Result<LedgerStore> {
    let store = LedgerStore::open(dir.path().join("test.db"), DEFAULT_COMMAND_TIMEOUT).await?;
    store.initialize().await?;
    Ok(store)
}

/// Noon on the given day
pub fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}
