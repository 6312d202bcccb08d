mod error;
mod scalar;
mod store;

pub use error::*;
pub use scalar::*;
pub use store::*;

/// Schema script run by [`LedgerStore::initialize`].
pub const SCHEMA: &str = include_str!("schema.sql");
