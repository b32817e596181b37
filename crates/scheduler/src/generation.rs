//! Generation tokens for superseding asynchronous work
//!
//! A generation counter is a monotonically increasing integer shared between
//! the component that starts work and every task doing that work. Starting a
//! new request bumps the counter; tasks holding an older [`Generation`] see
//! that they are no longer current at their next checkpoint and discard their
//! result instead of writing it.

use std::fmt;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Outcome of a generation check that failed because newer work started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("superseded: generation {captured} is stale (current {current})")]
pub struct Superseded {
    /// Generation captured when the work started
    pub captured: u64,

    /// Generation observed at the failed checkpoint
    pub current: u64,
}

/// Shared monotonic counter for one kind of work.
///
/// Clones share the same underlying counter, so a task can carry a clone and
/// compare against it later.
///
/// # Example
///
/// ```
/// use pageflow_scheduler::GenerationCounter;
///
/// let loads = GenerationCounter::new();
/// let first = loads.bump();
/// assert!(first.is_current());
///
/// // A newer load supersedes the first one
/// let second = loads.bump();
/// assert!(!first.is_current());
/// assert!(second.is_current());
/// ```
#[derive(Clone, Default)]
pub struct GenerationCounter {
    value: Arc<AtomicU64>,
}

impl GenerationCounter {
    /// Create a counter starting at generation 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation, invalidating every previously captured token.
    pub fn bump(&self) -> Generation {
        let value = self.value.fetch_add(1, Ordering::AcqRel) + 1;
        Generation {
            value,
            counter: self.value.clone(),
        }
    }

    /// Capture the current generation without invalidating anything.
    pub fn capture(&self) -> Generation {
        Generation {
            value: self.current(),
            counter: self.value.clone(),
        }
    }

    /// Current value of the counter
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

impl fmt::Debug for GenerationCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationCounter")
            .field("current", &self.current())
            .finish()
    }
}

/// A captured generation value.
///
/// Valid only while the counter it came from still holds the same value.
#[derive(Clone)]
pub struct Generation {
    value: u64,
    counter: Arc<AtomicU64>,
}

impl Generation {
    /// The captured value
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Whether no newer generation has started since this one was captured
    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::Acquire) == self.value
    }

    /// Checkpoint helper for `?`-style early exit from superseded work.
    pub fn check(&self) -> Result<(), Superseded> {
        let current = self.counter.load(Ordering::Acquire);
        if current == self.value {
            Ok(())
        } else {
            Err(Superseded {
                captured: self.value,
                current,
            })
        }
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("value", &self.value)
            .field("current", &self.is_current())
            .finish()
    }
}

/// The independent counters used by the viewer.
///
/// Loads, navigations and preloads each supersede only their own kind: a
/// scale change cancels preloading without cancelling an in-flight
/// navigation, and vice versa.
#[derive(Debug, Clone, Default)]
pub struct GenerationTokens {
    /// Document open/close requests
    pub load: GenerationCounter,

    /// Navigation requests
    pub navigation: GenerationCounter,

    /// Height preload passes
    pub preload: GenerationCounter,
}

impl GenerationTokens {
    /// Create a fresh set of counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate all outstanding work of every kind.
    pub fn bump_all(&self) {
        self.load.bump();
        self.navigation.bump();
        self.preload.bump();
    }
}
