//! Pageflow Scheduler Library
//!
//! Cooperative scheduling primitives for the paginated viewer.
//!
//! This crate provides the pieces every asynchronous viewer component is
//! built from: generation counters that let newer requests supersede older
//! in-flight work, a trailing-edge debouncer, an idle-scheduling seam, and a
//! cooperative worker pool that drains a shared cursor.
//!
//! # Example
//!
//! ```
//! use pageflow_scheduler::{run_cursor_pool, GenerationCounter, WorkOutcome, WorkerPoolConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let preloads = GenerationCounter::new();
//! let generation = preloads.bump();
//!
//! let report = run_cursor_pool(1..=12, WorkerPoolConfig::new(2), &generation, |page| async move {
//!     // measure `page` here; bail out with WorkOutcome::Stop once superseded
//!     let _ = page;
//!     WorkOutcome::Done
//! })
//! .await;
//!
//! assert_eq!(report.processed, 12);
//! # }
//! ```

mod debounce;
mod generation;
mod idle;
mod worker;

// Re-export public API
pub use debounce::Debouncer;
pub use generation::{Generation, GenerationCounter, GenerationTokens, Superseded};
pub use idle::{DelayIdle, IdleScheduler, YieldNow};
pub use worker::{run_cursor_pool, Cursor, PoolReport, WorkOutcome, WorkerPoolConfig};
