mod common;

use anyhow::Result;
use common::{at, test_ledger};
use facturo::application::{InvoiceFilter, TransactionFilter};
use facturo::domain::{DateRange, TransactionStatus};

#[tokio::test]
async fn test_status_labels_are_seeded() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;

    let labels = ledger.queries.status_labels().await?;
    let pairs: Vec<_> = labels.iter().map(|l| (l.code, l.label.as_str())).collect();
    assert_eq!(pairs, vec![(1, "Pending"), (2, "Billed"), (3, "Paid")]);

    Ok(())
}

#[tokio::test]
async fn test_transaction_listing_filters() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let a = ledger.register_at(at(2024, 2, 1), "A", 100).await?;
    let b = ledger.register_at(at(2024, 2, 10), "B", 200).await?;
    let c = ledger.register_at(at(2024, 3, 1), "C", 300).await?;
    ledger.invoices.generate_invoice_from_transaction(b.id).await?;

    let all = ledger
        .queries
        .transaction_listing(&TransactionFilter::default())
        .await?;
    assert_eq!(all.len(), 3);
    assert_eq!(all[1].status_label, "Billed");

    let billed = ledger
        .queries
        .transaction_listing(&TransactionFilter {
            status: Some(TransactionStatus::Billed),
            range: None,
        })
        .await?;
    assert_eq!(billed.len(), 1);
    assert_eq!(billed[0].transaction.id, b.id);

    let february = ledger
        .queries
        .transaction_listing(&TransactionFilter {
            status: None,
            range: Some(DateRange::parse("01-Feb-2024", "29-Feb-2024")?),
        })
        .await?;
    let ids: Vec<_> = february.iter().map(|v| v.transaction.id).collect();
    assert_eq!(ids, vec![a.id, b.id]);
    assert!(!ids.contains(&c.id));

    Ok(())
}

#[tokio::test]
async fn test_invoice_listing_by_paid_flag() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let a = ledger.transactions.register_transaction("A", 100, None).await?;
    let b = ledger.transactions.register_transaction("B", 250, None).await?;
    let paid = ledger.invoices.generate_invoice_from_transaction(a.id).await?;
    ledger.invoices.generate_invoice_from_transaction(b.id).await?;
    ledger.invoices.pay(paid.id).await?;

    let all = ledger.queries.invoice_listing(&InvoiceFilter::default()).await?;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].recipient, "A");
    assert_eq!(all[0].payment_date, Some(at(2024, 1, 20)));
    assert_eq!(all[1].payment_date, None);

    let unpaid = ledger
        .queries
        .invoice_listing(&InvoiceFilter { paid: Some(false) })
        .await?;
    assert_eq!(unpaid.len(), 1);
    assert_eq!(unpaid[0].invoice.transaction_id, b.id);

    Ok(())
}

#[tokio::test]
async fn test_summary_totals() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let a = ledger.transactions.register_transaction("A", 100, None).await?;
    let b = ledger.transactions.register_transaction("B", 250, None).await?;
    ledger.transactions.register_transaction("C", 1000, None).await?;

    let invoice_a = ledger.invoices.generate_invoice_from_transaction(a.id).await?;
    ledger.invoices.generate_invoice_from_transaction(b.id).await?;
    ledger.invoices.pay(invoice_a.id).await?;

    let summary = ledger.queries.summary().await?;
    assert_eq!(summary.pending_count, 1);
    assert_eq!(summary.pending_cents, 1000);
    assert_eq!(summary.billed_count, 1);
    assert_eq!(summary.billed_cents, 250);
    assert_eq!(summary.paid_count, 1);
    assert_eq!(summary.paid_cents, 100);
    assert_eq!(summary.invoice_count, 2);
    assert_eq!(summary.unpaid_invoice_cents, 250);

    Ok(())
}
