//! Consensus module - block structure and proof-of-work

mod block;
pub mod pow;

pub use block::*;
pub use pow::{meets_difficulty, MiningResult};
