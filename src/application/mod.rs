//! Use cases over the ledger store: registering transactions, billing them,
//! recording payments and read-only reporting.

mod admin;
mod error;
mod invoices;
mod queries;
mod rows;
mod transactions;

pub use admin::*;
pub use error::*;
pub use invoices::*;
pub use queries::*;
pub use transactions::*;
