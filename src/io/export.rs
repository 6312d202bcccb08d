use std::io::Write;

use anyhow::{Result, bail};
use chrono::NaiveDateTime;
use serde::Serialize;

use crate::application::{InvoiceFilter, QueryFacade, TransactionFilter};
use crate::domain::{format_cents, format_timestamp};

/// Output encoding for exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => bail!("Unknown export format: {}. Use csv or json", other),
        }
    }
}

/// JSON envelope around exported records
#[derive(Debug, Serialize)]
struct Snapshot<T> {
    version: &'static str,
    exported_at: NaiveDateTime,
    records: Vec<T>,
}

/// Exporter for writing ledger listings as CSV or JSON
pub struct Exporter<'a> {
    queries: &'a QueryFacade,
}

impl<'a> Exporter<'a> {
    pub fn new(queries: &'a QueryFacade) -> Self {
        Self { queries }
    }

    /// Export transactions matching `filter`. Returns the number of records written.
    pub async fn export_transactions<W: Write>(
        &self,
        filter: &TransactionFilter,
        format: ExportFormat,
        exported_at: NaiveDateTime,
        writer: W,
    ) -> Result<usize> {
        let views = self.queries.transaction_listing(filter).await?;
        let count = views.len();

        match format {
            ExportFormat::Json => write_json(writer, exported_at, views)?,
            ExportFormat::Csv => {
                let mut csv_writer = csv::Writer::from_writer(writer);
                csv_writer.write_record([
                    "id",
                    "created_at",
                    "recipient",
                    "amount",
                    "amount_cents",
                    "description",
                    "status",
                ])?;
                for view in &views {
                    let t = &view.transaction;
                    csv_writer.write_record([
                        t.id.to_string(),
                        format_timestamp(t.created_at),
                        t.recipient.clone(),
                        format_cents(t.amount_cents),
                        t.amount_cents.to_string(),
                        t.description.clone().unwrap_or_default(),
                        view.status_label.clone(),
                    ])?;
                }
                csv_writer.flush()?;
            }
        }

        Ok(count)
    }

    /// Export invoices matching `filter`, with payment dates where paid.
    pub async fn export_invoices<W: Write>(
        &self,
        filter: &InvoiceFilter,
        format: ExportFormat,
        exported_at: NaiveDateTime,
        writer: W,
    ) -> Result<usize> {
        let views = self.queries.invoice_listing(filter).await?;
        let count = views.len();

        match format {
            ExportFormat::Json => write_json(writer, exported_at, views)?,
            ExportFormat::Csv => {
                let mut csv_writer = csv::Writer::from_writer(writer);
                csv_writer.write_record([
                    "invoice_id",
                    "transaction_id",
                    "invoice_date",
                    "recipient",
                    "amount",
                    "amount_cents",
                    "paid",
                    "payment_date",
                ])?;
                for view in &views {
                    let i = &view.invoice;
                    csv_writer.write_record([
                        i.id.to_string(),
                        i.transaction_id.to_string(),
                        format_timestamp(i.invoice_date),
                        view.recipient.clone(),
                        format_cents(i.amount_cents),
                        i.amount_cents.to_string(),
                        i.is_paid.to_string(),
                        view.payment_date.map(format_timestamp).unwrap_or_default(),
                    ])?;
                }
                csv_writer.flush()?;
            }
        }

        Ok(count)
    }
}

fn write_json<W: Write, T: Serialize>(
    mut writer: W,
    exported_at: NaiveDateTime,
    records: Vec<T>,
) -> Result<()> {
    let snapshot = Snapshot {
        version: env!("CARGO_PKG_VERSION"),
        exported_at,
        records,
    };
    let json = serde_json::to_string_pretty(&snapshot)?;
    writer.write_all(json.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
