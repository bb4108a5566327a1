//! Work claims.
//!
//! A run holds its claim for its whole lifetime; user cancellation releases
//! the claim, and the scheduler observes the release at the next checkpoint
//! fence. In-flight provider calls are simply abandoned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct WorkClaim {
    held: Arc<AtomicBool>,
}

impl WorkClaim {
    pub fn new() -> Self {
        Self {
            held: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Drop the claim; the owning run fails with cause `cancelled` at its
    /// next fence.
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        !self.held.load(Ordering::SeqCst)
    }
}

impl Default for WorkClaim {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_release_is_visible_to_clones() {
        let claim = WorkClaim::new();
        let observer = claim.clone();
        assert!(!observer.is_released());
        claim.release();
        assert!(observer.is_released());
    }
}
