//! Concurrent ingest and egress pipelines.
//!
//! Both pipelines dispatch one task per filesystem entry onto a bounded
//! worker pool of parallel threads. The pool size is explicit
//! configuration, never auto-scaled; ciphering is CPU-bound and the file
//! I/O blocks, so true parallelism pays for both.

pub mod egress;
pub mod ingest;

pub use egress::{EgressError, EgressSummary, Egressor};
pub use ingest::{IngestError, IngestStatus, IngestSummary, Ingestor};

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

/// Default worker count when the caller does not configure one.
pub const DEFAULT_WORKERS: usize = 4;

/// Build a bounded, named worker pool.
pub(crate) fn build_pool(
    threads: usize,
    name: &'static str,
) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(move |index| format!("{name}-{index}"))
        .build()
}

/// Shared completion counter, logged every few entries so long runs stay
/// observable without flooding the log.
pub(crate) struct Progress {
    completed: AtomicUsize,
    pipeline: &'static str,
}

impl Progress {
    const LOG_EVERY: usize = 10;

    pub(crate) fn new(pipeline: &'static str) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            pipeline,
        }
    }

    pub(crate) fn tick(&self) {
        let finished = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if finished % Self::LOG_EVERY == 0 {
            info!(pipeline = self.pipeline, finished, "entries processed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_bounded_to_requested_size() {
        let pool = build_pool(3, "test").unwrap();
        assert_eq!(pool.current_num_threads(), 3);
    }

    #[test]
    fn zero_threads_clamps_to_one() {
        let pool = build_pool(0, "test").unwrap();
        assert_eq!(pool.current_num_threads(), 1);
    }
}
