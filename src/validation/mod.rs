//! Validation module - transactions and their signatures

mod transaction;

pub use transaction::*;
