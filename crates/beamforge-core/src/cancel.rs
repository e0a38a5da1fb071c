//! Cooperative cancellation context, threaded through every provider call
//! and every orchestrator suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ProviderError;

/// A cheaply-cloneable flag shared between the job manager (which sets it
/// on cancel) and every task that needs to observe it.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Call at every suspension point; returns a terminal `Cancelled`
    /// error if the flag has been set.
    pub fn check(&self) -> Result<(), ProviderError> {
        if self.is_cancelled() {
            Err(ProviderError::cancelled())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_fails_only_after_cancel() {
        let c = Cancel::new();
        assert!(c.check().is_ok());
        c.cancel();
        assert!(c.check().is_err());
    }

    #[test]
    fn clones_share_state() {
        let c1 = Cancel::new();
        let c2 = c1.clone();
        c1.cancel();
        assert!(c2.is_cancelled());
    }
}
