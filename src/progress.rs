//! Progress-event trait for per-item pipeline events.
//!
//! Inject an `Arc<dyn PipelineProgress>` into [`crate::run::Pipeline`] to
//! receive events as items resolve. Callbacks are the least-invasive
//! integration point: the CLI forwards them to a terminal progress bar, a
//! service could forward them to a channel or a metrics sink, and the
//! library stays ignorant of either.
//!
//! Items resolve out of order under concurrency, so implementations must
//! tolerate interleaved calls and protect any shared mutable state.

use std::sync::Arc;

/// Called by the executor as it works through the item list.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Implementations must be `Send + Sync`.
pub trait PipelineProgress: Send + Sync {
    /// Called once with the enumerated item count before execution starts.
    fn on_run_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called just before an item's transform pipeline begins.
    fn on_item_start(&self, name: &str) {
        let _ = name;
    }

    /// Called when an item is skipped without any I/O or transform work.
    fn on_item_skipped(&self, name: &str) {
        let _ = name;
    }

    /// Called when an item fully succeeds (`artifacts` uploaded or merged).
    fn on_item_complete(&self, name: &str, artifacts: usize) {
        let _ = (name, artifacts);
    }

    /// Called when an item fails terminally (it will be retried next run).
    fn on_item_error(&self, name: &str, error: &str) {
        let _ = (name, error);
    }

    /// Called once after the item list is drained or the run is interrupted.
    fn on_run_complete(&self, succeeded: usize, skipped: usize, failed: usize) {
        let _ = (succeeded, skipped, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl PipelineProgress for NoopProgress {}

/// Convenience alias matching the type held by [`crate::run::Pipeline`].
pub type ProgressHandle = Arc<dyn PipelineProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        skipped: AtomicUsize,
        completed: AtomicUsize,
        errored: AtomicUsize,
    }

    impl PipelineProgress for Counting {
        fn on_item_skipped(&self, _name: &str) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }
        fn on_item_complete(&self, _name: &str, _artifacts: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_item_error(&self, _name: &str, _error: &str) {
            self.errored.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_does_not_panic() {
        let p = NoopProgress;
        p.on_run_start(3);
        p.on_item_start("a.png");
        p.on_item_skipped("a.png");
        p.on_item_complete("b.png", 2);
        p.on_item_error("c.png", "boom");
        p.on_run_complete(1, 1, 1);
    }

    #[test]
    fn counting_callback_receives_events() {
        let p = Counting::default();
        p.on_item_skipped("a");
        p.on_item_complete("b", 1);
        p.on_item_complete("c", 4);
        p.on_item_error("d", "gone");
        assert_eq!(p.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(p.completed.load(Ordering::SeqCst), 2);
        assert_eq!(p.errored.load(Ordering::SeqCst), 1);
    }
}
