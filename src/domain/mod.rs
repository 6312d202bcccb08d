mod clock;
mod date;
mod invoice;
mod money;
mod transaction;

pub use clock::*;
pub use date::*;
pub use invoice::*;
pub use money::*;
pub use transaction::*;
