//! Cancellation for proof-of-work searches
//!
//! Every mining attempt gets its own [`CancelToken`]. The chain keeps the
//! token of the attempt in flight in a [`MiningSlot`] so that whoever moves
//! the tip can stop a now-stale search without ever blocking.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot, shareable cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent and never blocks.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn same_attempt(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

/// Holds the token of the single mining attempt currently in flight
#[derive(Debug, Default)]
pub struct MiningSlot {
    current: Mutex<Option<CancelToken>>,
}

impl MiningSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` as the attempt in flight
    ///
    /// Each attempt must bring a fresh token. A token left behind by an
    /// earlier attempt is cancelled.
    pub fn arm(&self, token: &CancelToken) {
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            if !previous.same_attempt(token) {
                previous.cancel();
            }
        }
    }

    /// Cancel the attempt in flight, if any. Returns whether one was signalled.
    pub fn fire(&self) -> bool {
        match self.current.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the slot once `token`'s attempt has finished
    pub fn disarm(&self, token: &CancelToken) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|t| t.same_attempt(token)) {
            *current = None;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let handle = token.clone();
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_fire_without_miner_is_noop() {
        let slot = MiningSlot::new();
        assert!(!slot.fire());
    }

    #[test]
    fn test_fire_cancels_armed_token_once() {
        let slot = MiningSlot::new();
        let token = CancelToken::new();
        slot.arm(&token);

        assert!(slot.fire());
        assert!(token.is_cancelled());
        assert!(!slot.fire());
    }

    #[test]
    fn test_rearm_cancels_stale_attempt() {
        let slot = MiningSlot::new();
        let first = CancelToken::new();
        let second = CancelToken::new();
        slot.arm(&first);
        slot.arm(&second);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_disarm_ignores_other_attempts() {
        let slot = MiningSlot::new();
        let stale = CancelToken::new();
        let live = CancelToken::new();
        slot.arm(&live);

        slot.disarm(&stale);
        assert!(slot.is_armed());

        slot.disarm(&live);
        assert!(!slot.is_armed());
        assert!(!live.is_cancelled());
    }
}
