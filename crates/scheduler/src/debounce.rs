//! Trailing-edge debouncer
//!
//! Coalesces a burst of calls into a single execution of the last call once
//! the burst has been quiet for the configured delay.

use crate::generation::GenerationCounter;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

/// Trailing-edge debouncer backed by a generation counter.
///
/// Each call supersedes the previous pending one. Only the most recent call
/// of a burst runs, `delay` after it was made. Calls must be made from within
/// a tokio runtime.
///
/// # Example
///
/// ```
/// use pageflow_scheduler::Debouncer;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let debouncer = Debouncer::new(Duration::from_millis(10));
/// for center in 1..=5 {
///     debouncer.call(move || println!("recompute around {center}"));
/// }
/// // Only "recompute around 5" is printed
/// tokio::time::sleep(Duration::from_millis(20)).await;
/// assert_eq!(debouncer.executions(), 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    generation: GenerationCounter,
    executions: Arc<AtomicU64>,
}

impl Debouncer {
    /// Create a debouncer with the given quiet interval
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: GenerationCounter::new(),
            executions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule `action`, superseding any call still waiting.
    pub fn call<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.generation.bump();
        let delay = self.delay;
        let executions = self.executions.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if token.is_current() {
                executions.fetch_add(1, Ordering::Relaxed);
                action();
            }
        });
    }

    /// Drop the pending call, if any.
    pub fn cancel(&self) {
        self.generation.bump();
    }

    /// The quiet interval
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of calls that actually ran
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }
}
