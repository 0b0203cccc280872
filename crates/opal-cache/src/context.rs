//! Cross-thread compilation cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag checked between batch builds.
///
/// Cancellation is cooperative: a batch already inside the driver runs
/// to completion, batches not yet started are skipped.
#[derive(Debug, Default)]
pub struct CompilationContext {
    cancelled: AtomicBool,
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Re-arms the context for another compilation round.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_sticky_until_reset() {
        let ctx = CompilationContext::new();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
        ctx.reset();
        assert!(!ctx.is_cancelled());
    }
}
