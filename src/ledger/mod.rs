//! Ledger module: chart of accounts, journals, fiscal calendar, sequences

pub mod account;
pub mod core;
pub mod fiscal;
pub mod journal;
pub mod sequence;

pub use self::account::*;
pub use self::core::*;
pub use self::fiscal::*;
pub use self::journal::*;
pub use self::sequence::*;
