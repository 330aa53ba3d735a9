//! Cooperative cancellation and yielding for long-running operations.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// How many checkpoint iterations pass between voluntary yields.
pub const DEFAULT_YIELD_EVERY: u64 = 16;

/// Carried by every streaming request. The indexing pipeline calls
/// [`RequestContext::checkpoint`] at each chunk and batch boundary: an
/// aborted context raises [`Error::Cancelled`], and every N iterations
/// the task yields so other work can progress.
#[derive(Debug, Clone)]
pub struct RequestContext {
    aborted: Arc<AtomicBool>,
    iter: Arc<AtomicU64>,
    every: u64,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::with_yield_every(DEFAULT_YIELD_EVERY)
    }

    pub fn with_yield_every(every: u64) -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
            iter: Arc::new(AtomicU64::new(0)),
            every,
        }
    }

    /// Marks the context aborted; the next checkpoint fails.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Raises [`Error::Cancelled`] if aborted, otherwise yields every
    /// `every` iterations.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.is_aborted() {
            return Err(Error::Cancelled);
        }
        let n = self.iter.fetch_add(1, Ordering::Relaxed) + 1;
        if self.every > 0 && n % self.every == 0 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
