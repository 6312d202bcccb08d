use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use crate::application::{
    AdminOverride, AppError, InvoiceFilter, InvoiceManager, QueryFacade, TransactionFilter,
    TransactionManager,
};
use crate::config::Config;
use crate::domain::{
    Clock, SystemClock, Transaction, TransactionStatus, format_cents, format_timestamp,
};
use crate::io::{ExportFormat, Exporter};
use crate::logging;
use crate::storage::LedgerStore;

/// Facturo - Transaction billing ledger
#[derive(Parser)]
#[command(name = "facturo")]
#[command(about = "Record transactions, bill them as invoices and track payments")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides config and FACTURO_DATABASE)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Config file (default: ./facturo.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage command timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Transaction management commands
    #[command(subcommand)]
    Transaction(TransactionCommands),

    /// Invoice management commands
    #[command(subcommand)]
    Invoice(InvoiceCommands),

    /// Machine-readable JSON output
    #[command(subcommand)]
    Api(ApiCommands),

    /// Status lookup table
    #[command(subcommand)]
    Status(StatusCommands),

    /// Administrative overrides outside the billing flow
    #[command(subcommand)]
    Admin(AdminCommands),

    /// Totals per status and outstanding invoices
    Summary,

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, invoices
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum TransactionCommands {
    /// Register a new pending transaction
    Create {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Recipient of the payment
        #[arg(long)]
        to: String,

        /// Description of the transaction
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List transactions (pending ones only when a date range is given)
    List {
        /// Range start, dd-MMM-yyyy (e.g., 01-Jan-2024)
        #[arg(long, requires = "end")]
        start: Option<String>,

        /// Range end, inclusive, dd-MMM-yyyy
        #[arg(long, requires = "start")]
        end: Option<String>,
    },

    /// Show a single transaction
    Show {
        /// Transaction ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum InvoiceCommands {
    /// Bill one or more pending transactions
    Create {
        /// Transaction IDs, billed in the given order
        #[arg(required = true)]
        transaction_ids: Vec<i64>,
    },

    /// List invoices
    List {
        /// Only paid invoices
        #[arg(long, conflicts_with = "unpaid")]
        paid: bool,

        /// Only unpaid invoices
        #[arg(long)]
        unpaid: bool,
    },

    /// Show an invoice with its transaction and payment
    Show {
        /// Invoice ID
        id: i64,
    },

    /// Record payment of an invoice
    Pay {
        /// Invoice ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum ApiCommands {
    /// Pending transactions created within a date range, as JSON
    Transactions {
        /// Range start, dd-MMM-yyyy
        #[arg(long)]
        start: String,

        /// Range end, inclusive, dd-MMM-yyyy
        #[arg(long)]
        end: String,
    },
}

#[derive(Subcommand)]
pub enum StatusCommands {
    /// List status codes and labels
    List,
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Force a transaction's status
    SetStatus {
        /// Transaction ID
        id: i64,

        /// New status: pending, billed, paid
        status: String,
    },
}

/// One-line message for a failed command, without the cause chain.
pub fn render_error(err: &anyhow::Error) -> String {
    format!("Error: {}", err)
}

/// Everything a command needs, sharing one store.
struct Ledger {
    store: LedgerStore,
    transactions: TransactionManager,
    invoices: InvoiceManager,
    queries: QueryFacade,
}

impl Ledger {
    async fn open(config: &Config) -> Result<Self> {
        let store = LedgerStore::open(&config.database, config.command_timeout())
            .await
            .with_context(|| format!("Failed to open database: {}", config.database.display()))?;
        store
            .initialize()
            .await
            .context("Failed to initialize database schema")?;

        Ok(Self {
            transactions: TransactionManager::new(store.clone()),
            invoices: InvoiceManager::new(store.clone()),
            queries: QueryFacade::new(store.clone()),
            store,
        })
    }
}

impl Cli {
    /// Resolve settings from defaults, file, environment and flags, in that order.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if let Some(secs) = self.timeout {
            config.command_timeout_secs = secs;
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.resolve_config()?;
        logging::init(&config.log_level);
        tracing::debug!(database = %config.database.display(), "configuration resolved");

        let ledger = Ledger::open(&config).await?;
        let result = self.dispatch(&ledger, &config).await;
        ledger.store.close().await;
        result
    }

    async fn dispatch(self, ledger: &Ledger, config: &Config) -> Result<()> {
        match self.command {
            Commands::Init => {
                println!("Database initialized: {}", config.database.display());
            }

            Commands::Transaction(cmd) => run_transaction_command(ledger, cmd).await?,

            Commands::Invoice(cmd) => run_invoice_command(ledger, cmd).await?,

            Commands::Api(ApiCommands::Transactions { start, end }) => {
                let transactions = ledger
                    .transactions
                    .list_pending_in_report_range(&start, &end)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&transactions)?);
            }

            Commands::Status(StatusCommands::List) => {
                let labels = ledger.queries.status_labels().await?;
                println!("{:<6} {}", "CODE", "LABEL");
                println!("{}", "-".repeat(20));
                for label in labels {
                    println!("{:<6} {}", label.code, label.label);
                }
            }

            Commands::Admin(AdminCommands::SetStatus { id, status }) => {
                let status = TransactionStatus::from_str(&status).with_context(|| {
                    format!("Invalid status '{}'. Valid: pending, billed, paid", status)
                })?;
                let admin = AdminOverride::new(ledger.store.clone());
                if !admin.override_status(id, status).await? {
                    bail!("Transaction not found: {}", id);
                }
                println!("Transaction {} set to {}", id, status);
            }

            Commands::Summary => {
                let s = ledger.queries.summary().await?;
                println!("{:<10} {:>6} {:>14}", "STATUS", "COUNT", "AMOUNT");
                println!("{}", "-".repeat(32));
                println!("{:<10} {:>6} {:>14}", "Pending", s.pending_count, format_cents(s.pending_cents));
                println!("{:<10} {:>6} {:>14}", "Billed", s.billed_count, format_cents(s.billed_cents));
                println!("{:<10} {:>6} {:>14}", "Paid", s.paid_count, format_cents(s.paid_cents));
                println!();
                println!("Invoices:        {}", s.invoice_count);
                println!("Outstanding:     {}", format_cents(s.unpaid_invoice_cents));
            }

            Commands::Export {
                export_type,
                output,
                format,
            } => {
                let format = ExportFormat::from_str(&format)?;
                run_export_command(ledger, &export_type, output.as_deref(), format).await?;
            }
        }
        Ok(())
    }
}

async fn run_transaction_command(ledger: &Ledger, cmd: TransactionCommands) -> Result<()> {
    match cmd {
        TransactionCommands::Create {
            amount,
            to,
            description,
        } => {
            let transaction = ledger
                .transactions
                .register_from_input(&to, &amount, description)
                .await?;
            println!(
                "Registered transaction {}: {} to {}",
                transaction.id,
                format_cents(transaction.amount_cents),
                transaction.recipient
            );
        }

        TransactionCommands::List { start, end } => {
            let transactions = match (start, end) {
                (Some(start), Some(end)) => {
                    ledger
                        .transactions
                        .list_pending_in_report_range(&start, &end)
                        .await?
                }
                _ => ledger.transactions.list_transactions().await?,
            };
            print_transactions(&transactions);
        }

        TransactionCommands::Show { id } => {
            let t = ledger.transactions.get_transaction(id).await?;
            println!("Transaction {}", t.id);
            println!("  Recipient:   {}", t.recipient);
            println!("  Amount:      {}", format_cents(t.amount_cents));
            if let Some(desc) = &t.description {
                println!("  Description: {}", desc);
            }
            println!("  Created:     {}", format_timestamp(t.created_at));
            println!("  Status:      {}", t.status);
        }
    }
    Ok(())
}

fn print_transactions(transactions: &[Transaction]) {
    if transactions.is_empty() {
        println!("No transactions found.");
        return;
    }
    println!(
        "{:<6} {:<20} {:<24} {:>12} {:<8}",
        "ID", "CREATED", "RECIPIENT", "AMOUNT", "STATUS"
    );
    println!("{}", "-".repeat(74));
    for t in transactions {
        println!(
            "{:<6} {:<20} {:<24} {:>12} {:<8}",
            t.id,
            format_timestamp(t.created_at),
            t.recipient,
            format_cents(t.amount_cents),
            t.status
        );
    }
}

async fn run_invoice_command(ledger: &Ledger, cmd: InvoiceCommands) -> Result<()> {
    match cmd {
        InvoiceCommands::Create { transaction_ids } => {
            match ledger.invoices.generate_invoices(&transaction_ids).await {
                Ok(invoices) => {
                    for invoice in invoices {
                        println!(
                            "Invoice {} for transaction {}: {}",
                            invoice.id,
                            invoice.transaction_id,
                            format_cents(invoice.amount_cents)
                        );
                    }
                }
                Err(AppError::BatchAborted {
                    billed,
                    failed,
                    source,
                }) => {
                    for id in &billed {
                        println!("Invoice {} created", id);
                    }
                    bail!("Billing stopped at transaction {}: {}", failed, source);
                }
                Err(err) => return Err(err.into()),
            }
        }

        InvoiceCommands::List { paid, unpaid } => {
            let filter = InvoiceFilter {
                paid: match (paid, unpaid) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };
            let invoices = ledger.queries.invoice_listing(&filter).await?;
            if invoices.is_empty() {
                println!("No invoices found.");
                return Ok(());
            }
            println!(
                "{:<6} {:<6} {:<20} {:<24} {:>12} {:<5}",
                "ID", "TX", "DATE", "RECIPIENT", "AMOUNT", "PAID"
            );
            println!("{}", "-".repeat(78));
            for view in invoices {
                let i = &view.invoice;
                println!(
                    "{:<6} {:<6} {:<20} {:<24} {:>12} {:<5}",
                    i.id,
                    i.transaction_id,
                    format_timestamp(i.invoice_date),
                    view.recipient,
                    format_cents(i.amount_cents),
                    if i.is_paid { "yes" } else { "no" }
                );
            }
        }

        InvoiceCommands::Show { id } => {
            let details = ledger.invoices.get_invoice(id).await?;
            let payments = ledger.invoices.list_payments(id).await?;
            let (i, t) = (&details.invoice, &details.transaction);
            println!("Invoice {}", i.id);
            println!("  Date:        {}", format_timestamp(i.invoice_date));
            println!("  Amount:      {}", format_cents(i.amount_cents));
            println!("  Paid:        {}", if i.is_paid { "yes" } else { "no" });
            println!("  Transaction: {} ({})", t.id, t.status);
            println!("  Recipient:   {}", t.recipient);
            if let Some(desc) = &t.description {
                println!("  Description: {}", desc);
            }
            for payment in payments {
                println!(
                    "  Payment {}:   {}",
                    payment.id,
                    format_timestamp(payment.payment_date)
                );
            }
        }

        InvoiceCommands::Pay { id } => {
            let payment = ledger.invoices.pay(id).await?;
            println!(
                "Invoice {} paid (payment {}) on {}",
                id,
                payment.id,
                format_timestamp(payment.payment_date)
            );
        }
    }
    Ok(())
}

async fn run_export_command(
    ledger: &Ledger,
    export_type: &str,
    output: Option<&std::path::Path>,
    format: ExportFormat,
) -> Result<()> {
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(&ledger.queries);
    let exported_at = SystemClock.now();

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let count = match export_type {
        "transactions" => {
            exporter
                .export_transactions(&TransactionFilter::default(), format, exported_at, writer)
                .await?
        }
        "invoices" => {
            exporter
                .export_invoices(&InvoiceFilter::default(), format, exported_at, writer)
                .await?
        }
        _ => {
            bail!(
                "Invalid export type '{}'. Valid types: transactions, invoices",
                export_type
            );
        }
    };

    if output.is_some() {
        eprintln!("Exported {} {}", count, export_type);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn test_render_error_shows_top_message_only() {
        let err = anyhow::Error::from(AppError::InvoiceNotFound(42))
            .context("Failed to pay invoice 42");
        assert_eq!(render_error(&err), "Error: Failed to pay invoice 42");

        let err = anyhow::Error::from(AppError::PaymentFailed {
            invoice_id: 7,
            source: StorageError::Init("disk full".to_string()),
        });
        let rendered = render_error(&err);
        assert!(rendered.starts_with("Error: "));
        assert!(!rendered.contains("Caused by"));
        assert!(!rendered.contains('\n'));
    }
}
