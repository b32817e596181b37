//! In-memory simulated backend
//!
//! Stands in for a real rasterizer in tests and in the CLI. Documents are
//! lists of page sizes; latencies, failing sources, broken pages and surface
//! races can be scripted. Handle counters make leaks and stale handles
//! observable.

use crate::backend::{
    BackendError, DocumentHandle, DocumentSource, PageBackend, PageHandle, PageViewport,
    RenderOutcome, RenderSurface,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Page sizes of a simulated document, at scale 1.0
#[derive(Debug, Clone, PartialEq)]
pub struct SimDocument {
    pages: Vec<PageViewport>,
    fetch_latency: Option<Duration>,
}

impl SimDocument {
    /// `page_count` pages of the same size
    pub fn uniform(page_count: u32, width: f32, height: f32) -> Self {
        Self {
            pages: vec![PageViewport { width, height }; page_count as usize],
            fetch_latency: None,
        }
    }

    /// One page per `(width, height)` pair
    pub fn from_sizes(sizes: impl IntoIterator<Item = (f32, f32)>) -> Self {
        Self {
            pages: sizes
                .into_iter()
                .map(|(width, height)| PageViewport { width, height })
                .collect(),
            fetch_latency: None,
        }
    }

    /// Override the size of one page (1-based)
    pub fn with_page_size(mut self, page: u32, width: f32, height: f32) -> Self {
        if let Some(size) = page.checked_sub(1).and_then(|index| self.pages.get_mut(index as usize)) {
            *size = PageViewport { width, height };
        }
        self
    }

    /// Page fetch latency of this document, overriding the backend's
    pub fn with_fetch_latency(mut self, latency: Duration) -> Self {
        self.fetch_latency = Some(latency);
        self
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Size of `page` at scale 1.0
    pub fn page_size(&self, page: u32) -> Option<PageViewport> {
        self.pages.get(page.checked_sub(1)? as usize).copied()
    }
}

#[derive(Default)]
struct Latencies {
    open: Duration,
    fetch: Duration,
    paint: Duration,
}

#[derive(Default)]
struct SimState {
    documents: Mutex<HashMap<String, Arc<SimDocument>>>,
    failing: Mutex<HashMap<String, String>>,
    latencies: Mutex<Latencies>,
    races: Mutex<HashMap<u32, u32>>,
    broken_pages: Mutex<HashMap<u32, String>>,
    live: AtomicUsize,
    opened: AtomicU64,
    destroyed: AtomicU64,
    page_fetches: AtomicU64,
    page_cleanups: AtomicU64,
    paints: AtomicU64,
    painting: Mutex<HashSet<u32>>,
    overlapping_paints: AtomicU64,
}

/// Marks a page surface as in use until dropped
struct SurfaceLease {
    state: Arc<SimState>,
    page: u32,
}

impl SurfaceLease {
    fn acquire(state: &Arc<SimState>, page: u32) -> Option<Self> {
        state.painting.lock().insert(page).then(|| Self {
            state: state.clone(),
            page,
        })
    }
}

impl Drop for SurfaceLease {
    fn drop(&mut self) {
        self.state.painting.lock().remove(&self.page);
    }
}

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

/// Scriptable in-memory backend and render surface.
///
/// Clones share documents, scripts and counters.
///
/// # Example
///
/// ```
/// use pageflow_viewer::sim::{SimDocument, SimulatedBackend};
/// use std::time::Duration;
///
/// let backend = SimulatedBackend::new()
///     .with_document("sim://report", SimDocument::uniform(120, 612.0, 792.0))
///     .with_fetch_latency(Duration::from_millis(2))
///     .with_render_race(5, 1);
/// assert_eq!(backend.live_documents(), 0);
/// ```
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    state: Arc<SimState>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `document` under `source`
    pub fn with_document(self, source: impl Into<String>, document: SimDocument) -> Self {
        self.state
            .documents
            .lock()
            .insert(source.into(), Arc::new(document));
        self
    }

    /// Make opening `source` fail as an invalid document
    pub fn with_failing_source(self, source: impl Into<String>, reason: impl Into<String>) -> Self {
        self.state.failing.lock().insert(source.into(), reason.into());
        self
    }

    pub fn with_open_latency(self, latency: Duration) -> Self {
        self.state.latencies.lock().open = latency;
        self
    }

    pub fn with_fetch_latency(self, latency: Duration) -> Self {
        self.state.latencies.lock().fetch = latency;
        self
    }

    pub fn with_paint_latency(self, latency: Duration) -> Self {
        self.state.latencies.lock().paint = latency;
        self
    }

    /// Report a busy surface for the next `times` paints of `page`
    pub fn with_render_race(self, page: u32, times: u32) -> Self {
        self.state.races.lock().insert(page, times);
        self
    }

    /// Make every paint of `page` fail
    pub fn with_broken_page(self, page: u32, reason: impl Into<String>) -> Self {
        self.state.broken_pages.lock().insert(page, reason.into());
        self
    }

    /// Document handles created and not yet destroyed
    pub fn live_documents(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Document handles created
    pub fn opened_documents(&self) -> u64 {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Document handles destroyed
    pub fn destroyed_documents(&self) -> u64 {
        self.state.destroyed.load(Ordering::SeqCst)
    }

    /// Page handles handed out
    pub fn page_fetches(&self) -> u64 {
        self.state.page_fetches.load(Ordering::SeqCst)
    }

    /// Page handles released
    pub fn page_cleanups(&self) -> u64 {
        self.state.page_cleanups.load(Ordering::SeqCst)
    }

    /// Paint calls received
    pub fn paints(&self) -> u64 {
        self.state.paints.load(Ordering::SeqCst)
    }

    /// Paints that started while the same page was still being painted
    pub fn overlapping_paints(&self) -> u64 {
        self.state.overlapping_paints.load(Ordering::SeqCst)
    }

    fn take_race(&self, page: u32) -> bool {
        let mut races = self.state.races.lock();
        match races.get_mut(&page) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl PageBackend for SimulatedBackend {
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentHandle>, BackendError> {
        let latency = self.state.latencies.lock().open;
        pause(latency).await;

        let failure = self.state.failing.lock().get(source.as_str()).cloned();
        if let Some(reason) = failure {
            return Err(BackendError::InvalidDocument(reason));
        }
        let document = self
            .state
            .documents
            .lock()
            .get(source.as_str())
            .cloned()
            .ok_or_else(|| BackendError::Unavailable(source.to_string()))?;

        let id = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.live.fetch_add(1, Ordering::SeqCst);
        trace!(%source, id, "simulated document opened");
        Ok(Arc::new(SimHandle {
            id,
            document,
            state: self.state.clone(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl RenderSurface for SimulatedBackend {
    async fn paint(&self, document: Arc<dyn DocumentHandle>, page: u32, scale: f32) -> RenderOutcome {
        self.state.paints.fetch_add(1, Ordering::SeqCst);
        let Some(_lease) = SurfaceLease::acquire(&self.state, page) else {
            self.state.overlapping_paints.fetch_add(1, Ordering::SeqCst);
            return RenderOutcome::RenderingFailed(BackendError::SurfaceBusy(format!(
                "page {page} is still being painted"
            )));
        };
        let latency = self.state.latencies.lock().paint;
        pause(latency).await;

        if self.take_race(page) {
            return RenderOutcome::RenderingFailed(BackendError::SurfaceBusy(format!(
                "page {page} surface already in use"
            )));
        }
        let broken = self.state.broken_pages.lock().get(&page).cloned();
        if let Some(reason) = broken {
            return RenderOutcome::RenderingFailed(BackendError::Render(reason));
        }

        match document.page(page).await {
            Ok(handle) => {
                let viewport = handle.viewport(scale);
                handle.cleanup();
                RenderOutcome::Rendered {
                    height: viewport.height,
                }
            }
            Err(err) => RenderOutcome::LoadingFailed(err),
        }
    }
}

struct SimHandle {
    id: u64,
    document: Arc<SimDocument>,
    state: Arc<SimState>,
    destroyed: AtomicBool,
}

#[async_trait]
impl DocumentHandle for SimHandle {
    fn page_count(&self) -> u32 {
        self.document.page_count()
    }

    async fn page(&self, page: u32) -> Result<Box<dyn PageHandle>, BackendError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(BackendError::Cancelled);
        }
        let size = self.document.page_size(page).ok_or(BackendError::PageOutOfRange {
            page,
            page_count: self.page_count(),
        })?;

        let latency = self
            .document
            .fetch_latency
            .unwrap_or_else(|| self.state.latencies.lock().fetch);
        pause(latency).await;
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(BackendError::Cancelled);
        }

        self.state.page_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimPage {
            size,
            state: self.state.clone(),
        }))
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
            self.state.destroyed.fetch_add(1, Ordering::SeqCst);
            trace!(id = self.id, "simulated document destroyed");
        }
    }
}

struct SimPage {
    size: PageViewport,
    state: Arc<SimState>,
}

impl PageHandle for SimPage {
    fn viewport(&self, scale: f32) -> PageViewport {
        PageViewport {
            width: self.size.width * scale,
            height: self.size.height * scale,
        }
    }

    fn cleanup(self: Box<Self>) {
        self.state.page_cleanups.fetch_add(1, Ordering::SeqCst);
    }
}
