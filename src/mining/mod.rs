//! Mining: cancellation, the background miner and its transaction source

mod cancel;
mod mempool;
mod miner;

pub use cancel::{CancelToken, MiningSlot};
pub use mempool::Mempool;
pub use miner::{Miner, MinerHandle};
