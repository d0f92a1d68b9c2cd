//! Operator-triggered cancellation.

use crate::{BundleError, BundleResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag.
///
/// Clones observe the same flag. Long-running steps poll it between units of
/// work (artifacts, archive entries, download chunks, child process waits).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` on the first call only.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::SeqCst);
        if first {
            tracing::warn!("cancellation requested");
        }
        first
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`BundleError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> BundleResult<()> {
        if self.is_cancelled() {
            Err(BundleError::Cancelled)
        } else {
            Ok(())
        }
    }
}
