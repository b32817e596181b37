//! Background height preloading
//!
//! Measures page heights ahead of rendering so placeholders get their real
//! size before the user scrolls to them. A pass runs in two phases: the first
//! `eager_pages` pages right away, then, after yielding to the host's idle
//! facility, the rest of the document up to a hard cap. Both phases drain a
//! shared cursor with a small cooperative worker pool.

use crate::backend::DocumentHandle;
use crate::config::EngineConfig;
use pageflow_cache::{GeometryCache, HeightSource, WriteOutcome};
use pageflow_scheduler::{
    run_cursor_pool, Generation, GenerationCounter, IdleScheduler, PoolReport, Superseded,
    WorkOutcome, WorkerPoolConfig, YieldNow,
};
use parking_lot::Mutex;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Page ranges of the two phases of a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadPlan {
    pub eager: RangeInclusive<u32>,
    pub idle: RangeInclusive<u32>,
}

impl PreloadPlan {
    /// Split `1..=min(page_count, cap)` after `eager_pages`.
    pub fn new(page_count: u32, eager_pages: u32, cap: u32) -> Self {
        let limit = page_count.min(cap);
        let eager_end = eager_pages.min(limit);
        Self {
            eager: 1..=eager_end,
            idle: eager_end + 1..=limit,
        }
    }
}

/// Summary of one finished or cancelled pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub eager: PoolReport,
    pub idle: PoolReport,
    pub cancelled: bool,
}

impl PreloadReport {
    /// Heights stored by this pass
    pub fn measured(&self) -> usize {
        self.eager.processed + self.idle.processed
    }
}

struct PassContext {
    document: Arc<dyn DocumentHandle>,
    cache: GeometryCache,
    session: u64,
    scale: f32,
    generation: Generation,
    workers: WorkerPoolConfig,
}

impl PassContext {
    async fn measure(&self, page: u32) -> WorkOutcome {
        match self.try_measure(page).await {
            Ok(outcome) => outcome,
            Err(superseded) => {
                debug!(page, captured = superseded.captured, current = superseded.current, "preload superseded");
                WorkOutcome::Stop
            }
        }
    }

    async fn try_measure(&self, page: u32) -> Result<WorkOutcome, Superseded> {
        self.generation.check()?;
        if self.cache.contains(page) {
            return Ok(WorkOutcome::Skipped);
        }

        let handle = match self.document.page(page).await {
            Ok(handle) => handle,
            Err(err) if err.is_cancellation() => return Ok(WorkOutcome::Stop),
            Err(err) => {
                debug!(page, error = %err, "preload fetch failed");
                return Ok(WorkOutcome::Skipped);
            }
        };

        if let Err(superseded) = self.generation.check() {
            handle.cleanup();
            return Err(superseded);
        }
        let viewport = handle.viewport(self.scale);
        handle.cleanup();

        Ok(
            match self
                .cache
                .record(self.session, page, viewport.height, HeightSource::Preload)
            {
                WriteOutcome::Stored => WorkOutcome::Done,
                WriteOutcome::Stale => WorkOutcome::Stop,
                WriteOutcome::Shadowed | WriteOutcome::Invalid => WorkOutcome::Skipped,
            },
        )
    }

    async fn run_phase(&self, range: RangeInclusive<u32>) -> PoolReport {
        run_cursor_pool(range, self.workers, &self.generation, |page| self.measure(page)).await
    }
}

async fn run_pass(ctx: PassContext, plan: PreloadPlan, idle: Arc<dyn IdleScheduler>) -> PreloadReport {
    let mut report = PreloadReport::default();
    debug!(
        generation = ctx.generation.value(),
        scale = ctx.scale,
        eager = ?plan.eager,
        idle = ?plan.idle,
        "preload pass started"
    );

    report.eager = ctx.run_phase(plan.eager).await;
    if report.eager.cancelled {
        report.cancelled = true;
        return report;
    }

    if !plan.idle.is_empty() {
        idle.wait_idle().await;
        if !ctx.generation.is_current() {
            report.cancelled = true;
            return report;
        }
        report.idle = ctx.run_phase(plan.idle).await;
        report.cancelled = report.idle.cancelled;
    }

    if report.cancelled {
        debug!(generation = ctx.generation.value(), "preload pass superseded");
    } else {
        info!(
            generation = ctx.generation.value(),
            measured = report.measured(),
            skipped = report.eager.skipped + report.idle.skipped,
            "preload pass finished"
        );
    }
    report
}

/// Background measurement of every page height.
pub struct HeightPreloader {
    cache: GeometryCache,
    preloads: GenerationCounter,
    idle: Arc<dyn IdleScheduler>,
    eager_pages: u32,
    cap: u32,
    workers: WorkerPoolConfig,
    running: Mutex<Option<JoinHandle<PreloadReport>>>,
    last_report: Arc<Mutex<Option<PreloadReport>>>,
    passes: AtomicU64,
}

impl HeightPreloader {
    /// Create a preloader writing into `cache`, superseded through `preloads`.
    pub fn new(cache: GeometryCache, preloads: GenerationCounter, config: &EngineConfig) -> Self {
        Self {
            cache,
            preloads,
            idle: Arc::new(YieldNow),
            eager_pages: config.eager_pages,
            cap: config.preload_cap,
            workers: WorkerPoolConfig::new(config.preload_concurrency),
            running: Mutex::new(None),
            last_report: Arc::new(Mutex::new(None)),
            passes: AtomicU64::new(0),
        }
    }

    /// Use the host's idle facility between the two phases
    pub fn with_idle_scheduler(mut self, idle: Arc<dyn IdleScheduler>) -> Self {
        self.idle = idle;
        self
    }

    /// Start a pass over `document` at `scale`, writing into cache `session`.
    ///
    /// Any pass still running is superseded.
    pub fn schedule(&self, document: Arc<dyn DocumentHandle>, session: u64, scale: f32) -> Generation {
        let generation = self.preloads.bump();
        let plan = PreloadPlan::new(document.page_count(), self.eager_pages, self.cap);
        let ctx = PassContext {
            document,
            cache: self.cache.clone(),
            session,
            scale,
            generation: generation.clone(),
            workers: self.workers,
        };
        let idle = self.idle.clone();
        let last_report = self.last_report.clone();

        let task = tokio::spawn(async move {
            let report = run_pass(ctx, plan, idle).await;
            *last_report.lock() = Some(report);
            report
        });
        self.passes.fetch_add(1, Ordering::Relaxed);
        *self.running.lock() = Some(task);
        generation
    }

    /// Supersede the running pass without waiting for it
    pub fn cancel(&self) {
        self.preloads.bump();
    }

    /// Supersede the running pass and wait up to `timeout` for it to reach a
    /// checkpoint. Returns `false` if it was still running at the deadline.
    pub async fn stop(&self, timeout: Duration) -> bool {
        self.cancel();
        let Some(task) = self.running.lock().take() else {
            return true;
        };
        match tokio::time::timeout(timeout, task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "preload did not stop in time");
                false
            }
        }
    }

    /// Whether a pass is still running
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Report of the most recent pass that returned
    pub fn last_report(&self) -> Option<PreloadReport> {
        *self.last_report.lock()
    }

    /// Number of passes started
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PageBackend;
    use crate::sim::{SimDocument, SimulatedBackend};
    use pageflow_scheduler::DelayIdle;

    async fn open(backend: &SimulatedBackend, source: &str) -> Arc<dyn DocumentHandle> {
        backend.open(&source.into()).await.unwrap()
    }

    fn preloader(cache: &GeometryCache, config: &EngineConfig) -> HeightPreloader {
        HeightPreloader::new(cache.clone(), GenerationCounter::new(), config)
    }

    #[test]
    fn test_plan_split() {
        assert_eq!(PreloadPlan::new(500, 12, 1500), PreloadPlan { eager: 1..=12, idle: 13..=500 });
        assert_eq!(PreloadPlan::new(5, 12, 1500), PreloadPlan { eager: 1..=5, idle: 6..=5 });
        assert_eq!(PreloadPlan::new(3000, 12, 1500).idle, 13..=1500);
        assert!(PreloadPlan::new(0, 12, 1500).eager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_measures_every_page() {
        let backend = SimulatedBackend::new().with_document("a", SimDocument::uniform(40, 600.0, 800.0));
        let cache = GeometryCache::new();
        let session = cache.reset(1.5);
        let preloader = preloader(&cache, &EngineConfig::default());

        preloader.schedule(open(&backend, "a").await, session, 1.5);
        assert!(preloader.stop_after_finish().await);

        assert_eq!(cache.len(), 40);
        assert_eq!(cache.height(40), Some(1200.0));
        let report = preloader.last_report().unwrap();
        assert_eq!(report.eager.processed, 12);
        assert_eq!(report.idle.processed, 28);
        assert!(!report.cancelled);
        assert_eq!(backend.page_cleanups(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_pages_are_skipped() {
        let backend = SimulatedBackend::new().with_document("a", SimDocument::uniform(10, 600.0, 800.0));
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);
        cache.record(session, 3, 777.0, HeightSource::Rendered);
        let preloader = preloader(&cache, &EngineConfig::default());

        preloader.schedule(open(&backend, "a").await, session, 1.0);
        preloader.stop_after_finish().await;

        assert_eq!(cache.height(3), Some(777.0));
        let report = preloader.last_report().unwrap();
        assert_eq!(report.eager.processed, 9);
        assert_eq!(report.eager.skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_limits_pass() {
        let backend = SimulatedBackend::new().with_document("a", SimDocument::uniform(50, 600.0, 800.0));
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);
        let config = EngineConfig {
            preload_cap: 20,
            ..EngineConfig::default()
        };
        let preloader = preloader(&cache, &config);

        preloader.schedule(open(&backend, "a").await, session, 1.0);
        preloader.stop_after_finish().await;
        assert_eq!(cache.len(), 20);
        assert!(!cache.contains(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_pass_stops_writing() {
        let backend = SimulatedBackend::new()
            .with_document("a", SimDocument::uniform(200, 600.0, 800.0))
            .with_fetch_latency(Duration::from_millis(10));
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);
        let preloader = preloader(&cache, &EngineConfig::default());

        preloader.schedule(open(&backend, "a").await, session, 1.0);
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(preloader.stop(Duration::from_millis(500)).await);

        let measured = cache.len();
        assert!(measured > 0 && measured < 200);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(cache.len(), measured);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_times_out_on_slow_fetch() {
        let backend = SimulatedBackend::new().with_document(
            "a",
            SimDocument::uniform(20, 600.0, 800.0).with_fetch_latency(Duration::from_secs(2)),
        );
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);
        let preloader = preloader(&cache, &EngineConfig::default());

        preloader.schedule(open(&backend, "a").await, session, 1.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(preloader.is_running());

        let started = tokio::time::Instant::now();
        assert!(!preloader.stop(Duration::from_millis(500)).await);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(500) && waited < Duration::from_millis(510));
        assert!(!preloader.is_running());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_change_rejects_stale_writes() {
        let backend = SimulatedBackend::new()
            .with_document("a", SimDocument::uniform(100, 600.0, 800.0))
            .with_fetch_latency(Duration::from_millis(10));
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);
        let preloader = preloader(&cache, &EngineConfig::default());
        let document = open(&backend, "a").await;

        preloader.schedule(document.clone(), session, 1.0);
        tokio::time::sleep(Duration::from_millis(25)).await;

        let session = cache.reset(2.0);
        preloader.schedule(document, session, 2.0);
        preloader.stop_after_finish().await;

        assert_eq!(cache.len(), 100);
        for page in 1..=100 {
            assert_eq!(cache.height(page), Some(1600.0), "page {page}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_phase_waits_for_host() {
        let backend = SimulatedBackend::new().with_document("a", SimDocument::uniform(30, 600.0, 800.0));
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);
        let preloader = preloader(&cache, &EngineConfig::default())
            .with_idle_scheduler(Arc::new(DelayIdle::new(Duration::from_millis(100))));

        preloader.schedule(open(&backend, "a").await, session, 1.0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.len(), 12);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 30);
    }

    impl HeightPreloader {
        /// Wait for the running pass to finish on its own
        async fn stop_after_finish(&self) -> bool {
            let Some(task) = self.running.lock().take() else {
                return true;
            };
            task.await.is_ok()
        }
    }
}
