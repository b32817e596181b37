//! The viewer engine
//!
//! [`ViewerEngine`] wires the components together and is the only type a host
//! talks to. Document switches go through the lifecycle manager, scroll
//! events through the boundary guard and the visibility observer, scale and
//! container changes invalidate geometry and restart preloading, and
//! navigation anchors are re-resolved whenever geometry moves under them.

use crate::backend::{measure_page, DocumentSource, PageBackend, PageViewport, RenderOutcome, RenderSurface};
use crate::boundary::{GuardOutcome, ScrollBoundaryGuard, ScrollBounds};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{DocumentState, EngineEvent, EngineSnapshot};
use crate::layout::PageLayout;
use crate::lifecycle::DocumentLifecycleManager;
use crate::navigation::{
    pick_height, resolve_offset, Attempt, NavigationController, NavigationHost, NavigationOutcome,
    NavigationTarget,
};
use crate::preload::{HeightPreloader, PreloadReport};
use crate::recovery::{RenderConflictRecovery, Resolution};
use crate::scale::{effective_scale, scale_changed};
use crate::visibility::VisibilityObserver;
use crate::window::{buffer_for_container, MountedSet, ViewportWindowManager, WindowChange};
use pageflow_cache::{GeometryCache, HeightSource};
use pageflow_scheduler::{GenerationTokens, IdleScheduler};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for [`ViewerEngine`]
pub struct ViewerEngineBuilder {
    backend: Arc<dyn PageBackend>,
    config: EngineConfig,
    surface: Option<Arc<dyn RenderSurface>>,
    idle: Option<Arc<dyn IdleScheduler>>,
}

impl ViewerEngineBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Paint newly mounted pages through `surface`.
    ///
    /// Without a surface the host renders pages itself and reports back
    /// through [`ViewerEngine::handle_render_outcome`].
    pub fn with_render_surface(mut self, surface: Arc<dyn RenderSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Idle facility used between the two preload phases
    pub fn with_idle_scheduler(mut self, idle: Arc<dyn IdleScheduler>) -> Self {
        self.idle = Some(idle);
        self
    }

    /// Validate the configuration and build the engine.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] for an invalid configuration.
    pub fn build(self) -> EngineResult<(ViewerEngine, mpsc::UnboundedReceiver<EngineEvent>)> {
        let config = self.config.validate()?;
        let (events, receiver) = mpsc::unbounded_channel();
        let tokens = GenerationTokens::new();
        let cache = GeometryCache::new();
        let backend = self.backend;
        let surface = self.surface;
        let idle = self.idle;

        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            let window = ViewportWindowManager::new(
                config.buffer_pages,
                config.max_mounted_pages,
                config.debounce(),
            );
            let listener = weak.clone();
            window.set_listener(Arc::new(move |change: &WindowChange| {
                if let Some(inner) = listener.upgrade() {
                    inner.on_window_change(change);
                }
            }));

            let guard = ScrollBoundaryGuard::new(config.notice_ttl());
            let notices = events.clone();
            guard.set_clear_listener(Arc::new(move |id| {
                let _ = notices.send(EngineEvent::NoticeCleared { id });
            }));

            let mut preloader = HeightPreloader::new(cache.clone(), tokens.preload.clone(), &config);
            if let Some(idle) = idle {
                preloader = preloader.with_idle_scheduler(idle);
            }

            EngineInner {
                lifecycle: DocumentLifecycleManager::new(backend, tokens.load.clone()),
                navigation: NavigationController::new(tokens.navigation.clone(), &config),
                visibility: VisibilityObserver::new(config.root_margin_px),
                recovery: RenderConflictRecovery::new(),
                painting: Mutex::new(HashMap::new()),
                view: Mutex::new(ViewState::new()),
                tokens,
                cache,
                window,
                preloader,
                guard,
                surface,
                events,
                config,
            }
        });

        Ok((ViewerEngine { inner }, receiver))
    }
}

#[derive(Debug, Clone, Copy)]
struct ViewState {
    requested_scale: f32,
    effective_scale: f32,
    container_width: f32,
    container_height: f32,
    scroll_top: f32,
    base_page: Option<PageViewport>,
    target: Option<NavigationTarget>,
}

impl ViewState {
    fn new() -> Self {
        Self {
            requested_scale: 1.0,
            effective_scale: 1.0,
            container_width: 0.0,
            container_height: 0.0,
            scroll_top: 0.0,
            base_page: None,
            target: None,
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    lifecycle: DocumentLifecycleManager,
    cache: GeometryCache,
    window: ViewportWindowManager,
    visibility: VisibilityObserver,
    preloader: HeightPreloader,
    navigation: NavigationController,
    guard: ScrollBoundaryGuard,
    recovery: RenderConflictRecovery,
    surface: Option<Arc<dyn RenderSurface>>,
    /// Latest paint task per page
    painting: Mutex<HashMap<u32, JoinHandle<()>>>,
    view: Mutex<ViewState>,
    tokens: GenerationTokens,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineInner {
    fn emit(&self, event: EngineEvent) {
        // a host that dropped its receiver just stops hearing about changes
        let _ = self.events.send(event);
    }

    fn layout(&self) -> PageLayout {
        let heights = self
            .cache
            .resolve_all(self.window.page_count(), self.config.fallback_page_height_px);
        PageLayout::new(heights, self.config.page_gap_px)
    }

    /// Empty the window, cache and per-document state.
    fn reset_document_state(&self) {
        let previous = self.window.mounted();
        self.window.reset(0);
        if !previous.is_empty() {
            self.emit(EngineEvent::WindowChanged {
                mounted: Vec::new(),
                added: Vec::new(),
                removed: previous.to_vec(),
            });
        }
        for (_, task) in self.painting.lock().drain() {
            task.abort();
        }
        self.recovery.reset();
        self.visibility.reset();
        self.guard.reset();
        self.navigation.clear();

        let scale = {
            let mut view = self.view.lock();
            view.scroll_top = 0.0;
            view.base_page = None;
            view.effective_scale
        };
        self.cache.reset(scale);
    }

    /// Install the estimate and the measured first-page height for `session`.
    fn seed_geometry(&self, session: u64, base: Option<PageViewport>, scale: f32) {
        if let Some(base) = base {
            let height = base.height * scale;
            self.cache.set_estimate(session, height);
            self.cache.record(session, 1, height, HeightSource::FirstPage);
        }
    }

    /// Widen the window buffer when pages are short next to the container.
    fn refresh_buffer(&self) {
        let container_height = self.view.lock().container_height;
        let buffer = match self.cache.estimate() {
            Some(estimate) => buffer_for_container(
                container_height,
                estimate + self.config.page_gap_px,
                self.config.buffer_pages,
            ),
            None => self.config.buffer_pages,
        };
        self.window.set_buffer_pages(buffer);
    }

    fn on_window_change(self: &Arc<Self>, change: &WindowChange) {
        self.emit(EngineEvent::WindowChanged {
            mounted: change.mounted.to_vec(),
            added: change.added.clone(),
            removed: change.removed.clone(),
        });
        {
            let mut painting = self.painting.lock();
            for page in &change.removed {
                if let Some(task) = painting.remove(page) {
                    task.abort();
                }
            }
        }
        self.recovery.retain(&change.mounted);
        self.visibility.subscribe(self.window.page_count(), &change.mounted);
        for &page in &change.added {
            let epoch = self.recovery.epoch(page);
            self.paint(page, epoch);
        }
    }

    /// Paint `page` under `epoch` once the page's previous paint has settled.
    fn paint(self: &Arc<Self>, page: u32, epoch: u64) {
        let Some(surface) = self.surface.clone() else {
            return;
        };
        let inner = self.clone();
        let mut painting = self.painting.lock();
        let previous = painting.remove(&page);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if !inner.recovery.is_current(page, epoch) || !inner.window.mounted().contains(page) {
                debug!(page, epoch, "skipping paint for superseded epoch");
                return;
            }
            let Some(document) = inner.lifecycle.document() else {
                return;
            };
            let scale = inner.view.lock().effective_scale;
            let session = inner.cache.session();
            let outcome = surface.paint(document, page, scale).await;
            inner.apply_render_outcome(page, epoch, Some(session), outcome);
        });
        painting.insert(page, task);
    }

    fn apply_render_outcome(self: &Arc<Self>, page: u32, epoch: u64, session: Option<u64>, outcome: RenderOutcome) {
        if !self.window.mounted().contains(page) {
            debug!(page, epoch, "dropping render outcome for unmounted page");
            return;
        }
        match self.recovery.resolve(page, epoch, outcome) {
            Resolution::Rendered { height } => {
                let session = session.unwrap_or_else(|| self.cache.session());
                let stored = self.cache.record(session, page, height, HeightSource::Rendered);
                debug!(page, epoch, height, stored = stored.is_stored(), "page rendered");
            }
            Resolution::Discarded => {}
            Resolution::Remount { epoch } => {
                self.emit(EngineEvent::Remount { page, epoch });
                self.paint(page, epoch);
            }
            Resolution::Failed(err) => self.emit(EngineEvent::error(&err)),
        }
    }

    fn observe_visibility(&self, layout: &PageLayout, scroll_top: f32, container_height: f32) {
        if let Some(page) = self.visibility.observe(layout, scroll_top, container_height) {
            debug!(page, scroll_top, "most visible page changed");
            self.window.request_center(page);
        }
    }

    /// Move the scroll position on the engine's own behalf, staying inside
    /// the mounted range.
    fn scroll_programmatic(&self, offset: f32, layout: &PageLayout) -> f32 {
        let container_height = self.view.lock().container_height;
        let max = (layout.total_height() - container_height).max(0.0);
        let mut offset = offset.clamp(0.0, max);
        if let Some(bounds) = ScrollBounds::from_layout(layout, &self.window.mounted(), container_height) {
            offset = offset.clamp(bounds.min, bounds.max);
        }
        self.view.lock().scroll_top = offset;
        self.guard.release();
        self.emit(EngineEvent::ScrollTo { offset });
        self.observe_visibility(layout, offset, container_height);
        offset
    }

    fn schedule_navigation(self: &Arc<Self>, target: NavigationTarget) {
        let host: Arc<dyn NavigationHost> = self.clone();
        self.navigation
            .schedule_navigate(host, target, self.config.nav_max_retries);
    }

    /// Recompute the effective scale and invalidate geometry if it moved.
    fn refresh_scale(self: &Arc<Self>) -> f32 {
        let (previous, next, base, target) = {
            let mut view = self.view.lock();
            let next = effective_scale(
                view.requested_scale,
                view.container_width,
                view.base_page.map(|base| base.width),
                &self.config,
            );
            let previous = view.effective_scale;
            if !scale_changed(previous, next) {
                return previous;
            }
            view.effective_scale = next;
            (previous, next, view.base_page, view.target)
        };
        info!(previous, next, "effective scale changed");

        let mounted = self.window.mounted();
        for page in mounted.iter() {
            self.recovery.bump(page);
        }
        let session = self.cache.reset(next);
        self.seed_geometry(session, base, next);
        self.refresh_buffer();

        let Some(document) = self.lifecycle.document() else {
            return next;
        };
        self.preloader.schedule(document, session, next);
        for page in mounted.iter() {
            let epoch = self.recovery.epoch(page);
            self.emit(EngineEvent::Remount { page, epoch });
            self.paint(page, epoch);
        }
        if let Some(target) = target {
            self.schedule_navigation(target);
        }
        next
    }
}

impl NavigationHost for EngineInner {
    fn try_scroll(&self, target: &NavigationTarget) -> Attempt {
        let page_count = self.window.page_count();
        let container_height = self.view.lock().container_height;
        if page_count == 0 || container_height <= 0.0 || target.page_no > page_count {
            return Attempt::NotReady;
        }
        if !self.window.mounted().contains(target.page_no) {
            return Attempt::NotReady;
        }

        let layout = self.layout();
        let Some(top) = layout.top(target.page_no) else {
            return Attempt::NotReady;
        };
        let entry = self.cache.get(target.page_no);
        let rendered = entry
            .filter(|entry| entry.source == HeightSource::Rendered)
            .map(|entry| entry.height);
        let estimate = self
            .cache
            .estimate()
            .unwrap_or(self.config.fallback_page_height_px);
        let min_rendered = self.config.min_rendered_height_px;
        let height = pick_height(rendered, entry.map(|entry| entry.height), estimate, min_rendered);

        let offset = resolve_offset(
            top,
            height,
            target.y_ratio,
            container_height,
            self.config.nav_offset_factor,
        );
        let offset = self.scroll_programmatic(offset, &layout);
        Attempt::Scrolled {
            offset,
            rendered: rendered.is_some_and(|height| height > min_rendered),
        }
    }

    fn force_mount(&self, page: u32) {
        let page_count = self.window.page_count();
        if page >= 1 && page <= page_count {
            self.window.force_center(page);
        }
    }

    fn finished(&self, target: &NavigationTarget, outcome: &NavigationOutcome) {
        if !matches!(outcome, NavigationOutcome::GaveUp { .. }) {
            return;
        }
        let mut view = self.view.lock();
        if view.target == Some(*target) {
            debug!(%target, "dropping unreachable navigation target");
            view.target = None;
        }
    }
}

/// Virtualized paginated-document viewer.
///
/// Clones are handles to the same engine. Every method must be called from
/// within a tokio runtime.
///
/// # Example
///
/// ```
/// use pageflow_viewer::sim::{SimDocument, SimulatedBackend};
/// use pageflow_viewer::{EngineConfig, NavigationTarget, ViewerEngine};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), pageflow_viewer::EngineError> {
/// let backend = SimulatedBackend::new()
///     .with_document("sim://book", SimDocument::uniform(500, 600.0, 800.0));
/// let (engine, _events) = ViewerEngine::builder(Arc::new(backend.clone()))
///     .with_config(EngineConfig::default())
///     .with_render_surface(Arc::new(backend))
///     .build()?;
///
/// engine.set_container_size(900.0, 1000.0);
/// engine.load("sim://book").await?;
/// engine.navigate(NavigationTarget::new(10, 0.5));
/// engine.settle_navigation().await;
/// assert!(engine.mounted().contains(10));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ViewerEngine {
    inner: Arc<EngineInner>,
}

impl ViewerEngine {
    /// Start building an engine over `backend`
    pub fn builder(backend: Arc<dyn PageBackend>) -> ViewerEngineBuilder {
        ViewerEngineBuilder {
            backend,
            config: EngineConfig::default(),
            surface: None,
            idle: None,
        }
    }

    /// Engine over `backend` with `config` and no render surface
    pub fn new(
        backend: Arc<dyn PageBackend>,
        config: EngineConfig,
    ) -> EngineResult<(Self, mpsc::UnboundedReceiver<EngineEvent>)> {
        Self::builder(backend).with_config(config).build()
    }

    /// Open `source`, replacing the current document.
    ///
    /// Returns the page count, or `None` if a newer load or a close
    /// superseded this one.
    ///
    /// # Errors
    /// Returns [`EngineError::Load`] if the source cannot be opened; the
    /// engine is then left without a document.
    pub async fn load(&self, source: impl Into<DocumentSource>) -> EngineResult<Option<u32>> {
        let inner = &self.inner;
        let source = source.into();
        inner.navigation.cancel();

        let stop_timeout = inner.config.preload_stop_timeout();
        let opened = inner
            .lifecycle
            .open(source, async {
                inner.preloader.stop(stop_timeout).await;
                inner.reset_document_state();
            })
            .await;
        let opened = match opened {
            Ok(Some(opened)) => opened,
            Ok(None) => return Ok(None),
            Err(err) => {
                inner.emit(EngineEvent::error(&err));
                return Err(err);
            }
        };

        let document = opened.handle;
        let page_count = document.page_count();
        let base = if page_count > 0 {
            match measure_page(document.as_ref(), 1, 1.0).await {
                Ok(viewport) => Some(viewport),
                Err(err) if err.is_cancellation() => None,
                Err(err) => {
                    let err = EngineError::Render { page: 1, source: err };
                    warn!(error = %err, "first page measurement failed");
                    inner.emit(EngineEvent::error(&err));
                    None
                }
            }
        } else {
            None
        };
        if !opened.generation.is_current() {
            debug!("load superseded after first page measurement");
            return Ok(None);
        }

        let (scale, target) = {
            let mut view = inner.view.lock();
            view.base_page = base;
            view.effective_scale = effective_scale(
                view.requested_scale,
                view.container_width,
                base.map(|base| base.width),
                &inner.config,
            );
            (view.effective_scale, view.target)
        };
        let session = inner.cache.reset(scale);
        inner.seed_geometry(session, base, scale);
        inner.refresh_buffer();
        inner.window.reset(page_count);
        inner.visibility.subscribe(page_count, &MountedSet::new());
        inner.emit(EngineEvent::Loaded { page_count });
        info!(page_count, scale, "document ready");

        if page_count == 0 {
            return Ok(Some(0));
        }
        let center = target.map_or(1, |target| target.page_no.min(page_count));
        inner.window.force_center(center);
        inner.preloader.schedule(document, session, scale);
        if let Some(target) = target {
            inner.schedule_navigation(target);
        }
        Ok(Some(page_count))
    }

    /// Tear down the current document and every background task.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.tokens.bump_all();
        inner.preloader.stop(inner.config.preload_stop_timeout()).await;
        inner.lifecycle.close();
        inner.reset_document_state();
        inner.view.lock().target = None;
        info!("viewer closed");
    }

    /// Request a render scale. Returns the effective scale.
    pub fn set_scale(&self, scale: f32) -> f32 {
        self.inner.view.lock().requested_scale = scale;
        self.inner.refresh_scale()
    }

    /// Report the scroll container's size. Returns the effective scale.
    pub fn set_container_size(&self, width: f32, height: f32) -> f32 {
        {
            let mut view = self.inner.view.lock();
            view.container_width = width.max(0.0);
            view.container_height = height.max(0.0);
        }
        let scale = self.inner.refresh_scale();
        self.inner.refresh_buffer();
        let layout = self.inner.layout();
        let (scroll_top, container_height) = {
            let view = self.inner.view.lock();
            (view.scroll_top, view.container_height)
        };
        self.inner.observe_visibility(&layout, scroll_top, container_height);
        scale
    }

    /// Navigate to `target`, superseding any pending navigation.
    ///
    /// The target is kept and re-applied after scale changes and after the
    /// next load.
    pub fn navigate(&self, target: NavigationTarget) {
        self.inner.view.lock().target = Some(target);
        if self.inner.lifecycle.state() == DocumentState::Ready {
            self.inner.schedule_navigation(target);
        }
    }

    /// Wait for the pending navigation to end
    pub async fn settle_navigation(&self) -> Option<NavigationOutcome> {
        self.inner.navigation.settle().await
    }

    /// Native scroll of the container to `offset`.
    pub fn scroll_to(&self, offset: f32) -> GuardOutcome {
        let inner = &self.inner;
        let layout = inner.layout();
        let (current, container_height) = {
            let view = inner.view.lock();
            (view.scroll_top, view.container_height)
        };
        let max = (layout.total_height() - container_height).max(0.0);
        let requested = offset.clamp(0.0, max);

        let bounds = ScrollBounds::from_layout(&layout, &inner.window.mounted(), container_height);
        let outcome = inner.guard.guard(current, requested, bounds);
        inner.view.lock().scroll_top = outcome.scroll_top;

        if outcome.clamped {
            inner.emit(EngineEvent::ScrollTo {
                offset: outcome.scroll_top,
            });
        }
        if let Some(notice) = &outcome.notice {
            inner.emit(EngineEvent::notice(notice));
        }
        inner.observe_visibility(&layout, outcome.scroll_top, container_height);
        outcome
    }

    /// Wheel movement by `delta` pixels.
    pub fn wheel(&self, delta: f32) -> GuardOutcome {
        let current = self.scroll_top();
        self.scroll_to(current + delta)
    }

    /// Report the outcome of a host-driven render of `page` under `epoch`.
    pub fn handle_render_outcome(&self, page: u32, epoch: u64, outcome: RenderOutcome) {
        self.inner.apply_render_outcome(page, epoch, None, outcome);
    }

    /// Render epoch of a mounted page
    pub fn render_epoch(&self, page: u32) -> Option<u64> {
        self.inner
            .window
            .mounted()
            .contains(page)
            .then(|| self.inner.recovery.epoch(page))
    }

    pub fn mounted(&self) -> MountedSet {
        self.inner.window.mounted()
    }

    /// Current placeholder layout
    pub fn layout(&self) -> PageLayout {
        self.inner.layout()
    }

    /// The geometry cache
    pub fn geometry(&self) -> &GeometryCache {
        &self.inner.cache
    }

    pub fn page_count(&self) -> u32 {
        self.inner.window.page_count()
    }

    pub fn scroll_top(&self) -> f32 {
        self.inner.view.lock().scroll_top
    }

    pub fn effective_scale(&self) -> f32 {
        self.inner.view.lock().effective_scale
    }

    pub fn state(&self) -> DocumentState {
        self.inner.lifecycle.state()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Report of the last preload pass
    pub fn preload_report(&self) -> Option<PreloadReport> {
        self.inner.preloader.last_report()
    }

    /// Remounts triggered by render races
    pub fn remounts(&self) -> u64 {
        self.inner.recovery.remounts()
    }

    /// Point-in-time view of the engine
    pub fn snapshot(&self) -> EngineSnapshot {
        let inner = &self.inner;
        let view = *inner.view.lock();
        EngineSnapshot {
            document: inner.lifecycle.state(),
            source: inner.lifecycle.source().map(|source| source.to_string()),
            page_count: inner.window.page_count(),
            mounted: inner.window.mounted().to_vec(),
            scroll_top: view.scroll_top,
            container_height: view.container_height,
            effective_scale: view.effective_scale,
            cached_heights: inner.cache.len(),
            preloading: inner.preloader.is_running(),
            notice: inner.guard.notice(),
            navigation: inner.navigation.last_outcome(),
        }
    }
}
