//! Cooperative worker pool over a shared cursor.
//!
//! A fixed number of worker loops pull page numbers from one shared cursor
//! and run an async unit of work for each. The workers are joined futures
//! inside the calling task, so they interleave at their await points rather
//! than running on separate threads. Every loop checks its generation before
//! popping the next index so a superseded pass stops promptly.

use crate::generation::Generation;
use futures::future::join_all;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Configuration for a cursor pool pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of concurrent worker loops.
    /// Default: 2.
    pub num_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_workers: 2 }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with `num_workers` loops (at least one)
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
        }
    }
}

/// What a unit of work reports back to its worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The item was processed
    Done,
    /// The item needed no work (already known, failed softly, ...)
    Skipped,
    /// The pass was superseded; the worker should exit
    Stop,
}

/// Counters from one pool pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Items that reported [`WorkOutcome::Done`]
    pub processed: usize,
    /// Items that reported [`WorkOutcome::Skipped`]
    pub skipped: usize,
    /// Whether the pass ended because its generation went stale
    pub cancelled: bool,
}

/// Shared cursor over an inclusive range of indices.
#[derive(Debug)]
pub struct Cursor {
    next: AtomicU32,
    end: u32,
}

impl Cursor {
    /// Cursor that yields every index in `range` once
    pub fn new(range: RangeInclusive<u32>) -> Self {
        Self {
            next: AtomicU32::new(*range.start()),
            end: *range.end(),
        }
    }

    /// Take the next index, or `None` once the range is exhausted.
    pub fn pop(&self) -> Option<u32> {
        let index = self.next.fetch_add(1, Ordering::AcqRel);
        // fetch_add past u32::MAX would wrap; end < MAX in practice
        (index <= self.end).then_some(index)
    }
}

/// Run `work` over `range` with `config.num_workers` cooperative loops.
///
/// Returns once the range is exhausted or `generation` is no longer current.
pub async fn run_cursor_pool<F, Fut>(
    range: RangeInclusive<u32>,
    config: WorkerPoolConfig,
    generation: &Generation,
    work: F,
) -> PoolReport
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = WorkOutcome>,
{
    if range.is_empty() {
        return PoolReport::default();
    }

    let cursor = Cursor::new(range);
    let processed = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);

    let (cursor_ref, processed_ref, skipped_ref, work) = (&cursor, &processed, &skipped, &work);
    let workers = (0..config.num_workers.max(1)).map(|_| async move {
        loop {
            if !generation.is_current() {
                break;
            }
            let Some(index) = cursor_ref.pop() else {
                break;
            };
            match work(index).await {
                WorkOutcome::Done => {
                    processed_ref.fetch_add(1, Ordering::Relaxed);
                }
                WorkOutcome::Skipped => {
                    skipped_ref.fetch_add(1, Ordering::Relaxed);
                }
                WorkOutcome::Stop => break,
            }
        }
    });
    join_all(workers).await;

    PoolReport {
        processed: processed.into_inner(),
        skipped: skipped.into_inner(),
        cancelled: !generation.is_current(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationCounter;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.num_workers, 2);
    }

    #[test]
    fn test_worker_pool_config_never_zero() {
        assert_eq!(WorkerPoolConfig::new(0).num_workers, 1);
        assert_eq!(WorkerPoolConfig::new(4).num_workers, 4);
    }

    #[test]
    fn test_cursor_yields_each_index_once() {
        let cursor = Cursor::new(3..=5);
        assert_eq!(cursor.pop(), Some(3));
        assert_eq!(cursor.pop(), Some(4));
        assert_eq!(cursor.pop(), Some(5));
        assert_eq!(cursor.pop(), None);
        assert_eq!(cursor.pop(), None);
    }

    #[tokio::test]
    async fn test_pool_visits_every_index() {
        let counter = GenerationCounter::new();
        let generation = counter.bump();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let report = run_cursor_pool(1..=12, WorkerPoolConfig::new(3), &generation, |index| {
            let seen = seen.clone();
            async move {
                tokio::task::yield_now().await;
                seen.lock().unwrap().push(index);
                WorkOutcome::Done
            }
        })
        .await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (1..=12).collect::<Vec<_>>());
        assert_eq!(report.processed, 12);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_pool_counts_skips() {
        let generation = GenerationCounter::new().bump();
        let report = run_cursor_pool(1..=6, WorkerPoolConfig::new(2), &generation, |index| async move {
            if index % 2 == 0 {
                WorkOutcome::Skipped
            } else {
                WorkOutcome::Done
            }
        })
        .await;

        assert_eq!(report.processed, 3);
        assert_eq!(report.skipped, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_stops_when_superseded() {
        let counter = GenerationCounter::new();
        let generation = counter.bump();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let report = run_cursor_pool(1..=100, WorkerPoolConfig::new(2), &generation, |index| {
            let seen = seen.clone();
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                seen.lock().unwrap().push(index);
                if index == 4 {
                    counter.bump();
                }
                WorkOutcome::Done
            }
        })
        .await;

        assert!(report.cancelled);
        assert!(seen.lock().unwrap().len() < 10);
    }

    #[tokio::test]
    async fn test_stop_outcome_ends_worker() {
        let generation = GenerationCounter::new().bump();
        let report = run_cursor_pool(1..=10, WorkerPoolConfig::new(1), &generation, |index| async move {
            if index == 3 {
                WorkOutcome::Stop
            } else {
                WorkOutcome::Done
            }
        })
        .await;

        assert_eq!(report.processed, 2);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_empty_range() {
        let generation = GenerationCounter::new().bump();
        #[allow(clippy::reversed_empty_ranges)]
        let report = run_cursor_pool(5..=4, WorkerPoolConfig::default(), &generation, |_| async {
            WorkOutcome::Done
        })
        .await;
        assert_eq!(report, PoolReport::default());
    }
}
