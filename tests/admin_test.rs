mod common;

use anyhow::Result;
use common::test_ledger;
use facturo::domain::TransactionStatus;

#[tokio::test]
async fn test_override_sets_any_status() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let t = ledger.transactions.register_transaction("ACME", 100, None).await?;

    assert!(ledger.admin.override_status(t.id, TransactionStatus::Billed).await?);
    assert_eq!(
        ledger.transactions.get_transaction(t.id).await?.status,
        TransactionStatus::Billed
    );

    // Backwards moves are allowed here and nowhere else
    assert!(ledger.admin.override_status(t.id, TransactionStatus::Pending).await?);
    assert_eq!(
        ledger.transactions.get_transaction(t.id).await?.status,
        TransactionStatus::Pending
    );

    Ok(())
}

#[tokio::test]
async fn test_override_leaves_invoices_alone() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let t = ledger.transactions.register_transaction("ACME", 100, None).await?;
    let invoice = ledger
        .invoices
        .generate_invoice_from_transaction(t.id)
        .await?;

    ledger.admin.override_status(t.id, TransactionStatus::Paid).await?;

    let details = ledger.invoices.get_invoice(invoice.id).await?;
    assert!(!details.invoice.is_paid);
    assert!(ledger.invoices.list_payments(invoice.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_override_unknown_transaction() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;

    assert!(!ledger.admin.override_status(5, TransactionStatus::Paid).await?);

    Ok(())
}
