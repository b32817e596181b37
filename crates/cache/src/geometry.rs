//! Page geometry cache
//!
//! Maps page numbers to their rendered height at the current scale. Heights
//! come from three writers: the first-page measurement, the background preloader
//! and render completion. Render completion is authoritative and is never
//! overwritten by a measurement.
//!
//! Every reset starts a new *session*. Writers capture the session they were
//! started in and their writes are rejected once it has ended, so a slow
//! writer from a previous document or scale cannot leak entries forward.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 1-based page number
pub type PageNumber = u32;

/// Where a cached height came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeightSource {
    /// First page measured right after opening a document
    FirstPage,

    /// Background height preloader
    Preload,

    /// Actual render completion (authoritative)
    Rendered,
}

impl HeightSource {
    fn is_authoritative(self) -> bool {
        matches!(self, HeightSource::Rendered)
    }
}

/// A cached page height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageHeight {
    /// Height in pixels at the cache's scale
    pub height: f32,

    /// Writer that produced the value
    pub source: HeightSource,
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryStats {
    /// Number of pages with a cached height
    pub entries: usize,

    /// Lookups answered from a cached height
    pub hits: u64,

    /// Lookups that fell back to the estimate
    pub misses: u64,

    /// Writes dropped because their session had ended
    pub stale_writes: u64,

    /// Measurements dropped because a rendered height was already present
    pub shadowed_writes: u64,

    /// Number of wholesale resets
    pub resets: u64,
}

impl GeometryStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Result of a write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The height was stored
    Stored,
    /// The writer's session has ended; nothing was stored
    Stale,
    /// A rendered height already exists and measurements never replace it
    Shadowed,
    /// The height was not a positive finite number
    Invalid,
}

impl WriteOutcome {
    /// Whether the value ended up in the cache
    pub fn is_stored(self) -> bool {
        matches!(self, WriteOutcome::Stored)
    }
}

struct GeometryState {
    session: u64,
    scale: f32,
    heights: HashMap<PageNumber, PageHeight>,
    estimate: Option<f32>,
    stats: GeometryStats,
}

impl GeometryState {
    fn new() -> Self {
        Self {
            session: 0,
            scale: 1.0,
            heights: HashMap::new(),
            estimate: None,
            stats: GeometryStats::default(),
        }
    }
}

/// Shared page-height cache.
///
/// Clones are handles to the same cache.
///
/// # Example
///
/// ```
/// use pageflow_cache::{GeometryCache, HeightSource};
///
/// let cache = GeometryCache::new();
/// let session = cache.reset(1.5);
/// cache.set_estimate(session, 1188.0);
///
/// cache.record(session, 3, 1200.0, HeightSource::Preload);
/// assert_eq!(cache.height(3), Some(1200.0));
/// assert_eq!(cache.height_or_estimate(4, 1000.0), 1188.0);
///
/// // A scale change ends the session; late writers are rejected
/// cache.reset(2.0);
/// assert!(!cache.record(session, 5, 900.0, HeightSource::Preload).is_stored());
/// assert!(cache.is_empty());
/// ```
#[derive(Clone)]
pub struct GeometryCache {
    state: Arc<Mutex<GeometryState>>,
}

impl GeometryCache {
    /// Create an empty cache at scale 1.0
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GeometryState::new())),
        }
    }

    /// Drop every height and the estimate, and start a new session at `scale`.
    ///
    /// Returns the new session id.
    pub fn reset(&self, scale: f32) -> u64 {
        let mut state = self.state.lock();
        state.session += 1;
        state.scale = scale;
        state.heights.clear();
        state.estimate = None;
        state.stats.entries = 0;
        state.stats.resets += 1;
        debug!(session = state.session, scale, "geometry cache reset");
        state.session
    }

    /// Id of the current session
    pub fn session(&self) -> u64 {
        self.state.lock().session
    }

    /// Scale the cached heights were measured at
    pub fn scale(&self) -> f32 {
        self.state.lock().scale
    }

    /// Install the height used for pages that have not been measured.
    ///
    /// Returns `false` if `session` has ended or the height is unusable.
    pub fn set_estimate(&self, session: u64, height: f32) -> bool {
        if !is_usable(height) {
            return false;
        }
        let mut state = self.state.lock();
        if state.session != session {
            state.stats.stale_writes += 1;
            return false;
        }
        state.estimate = Some(height);
        true
    }

    /// Current estimate, if the first page has been measured
    pub fn estimate(&self) -> Option<f32> {
        self.state.lock().estimate
    }

    /// Store a height written by `source` during `session`.
    pub fn record(
        &self,
        session: u64,
        page: PageNumber,
        height: f32,
        source: HeightSource,
    ) -> WriteOutcome {
        if !is_usable(height) {
            return WriteOutcome::Invalid;
        }

        let mut state = self.state.lock();
        if state.session != session {
            state.stats.stale_writes += 1;
            debug!(page, session, current = state.session, "dropping stale height write");
            return WriteOutcome::Stale;
        }

        if !source.is_authoritative() {
            if let Some(existing) = state.heights.get(&page) {
                if existing.source.is_authoritative() {
                    state.stats.shadowed_writes += 1;
                    return WriteOutcome::Shadowed;
                }
            }
        }

        state.heights.insert(page, PageHeight { height, source });
        state.stats.entries = state.heights.len();
        WriteOutcome::Stored
    }

    /// Cached entry for `page`, if any
    pub fn get(&self, page: PageNumber) -> Option<PageHeight> {
        self.state.lock().heights.get(&page).copied()
    }

    /// Cached height for `page`, if any
    pub fn height(&self, page: PageNumber) -> Option<f32> {
        self.get(page).map(|entry| entry.height)
    }

    /// Cached height, else the estimate, else `fallback`.
    pub fn height_or_estimate(&self, page: PageNumber, fallback: f32) -> f32 {
        let mut state = self.state.lock();
        match state.heights.get(&page).map(|entry| entry.height) {
            Some(height) => {
                state.stats.hits += 1;
                height
            }
            None => {
                state.stats.misses += 1;
                state.estimate.unwrap_or(fallback)
            }
        }
    }

    /// Whether `page` has a cached height
    pub fn contains(&self, page: PageNumber) -> bool {
        self.state.lock().heights.contains_key(&page)
    }

    /// Heights for pages `1..=page_count`, using the estimate or `fallback`
    /// for pages not yet measured.
    pub fn resolve_all(&self, page_count: u32, fallback: f32) -> Vec<f32> {
        let state = self.state.lock();
        let estimate = state.estimate.unwrap_or(fallback);
        (1..=page_count)
            .map(|page| {
                state
                    .heights
                    .get(&page)
                    .map(|entry| entry.height)
                    .unwrap_or(estimate)
            })
            .collect()
    }

    /// Number of cached heights
    pub fn len(&self) -> usize {
        self.state.lock().heights.len()
    }

    /// Whether no heights are cached
    pub fn is_empty(&self) -> bool {
        self.state.lock().heights.is_empty()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> GeometryStats {
        self.state.lock().stats
    }
}

impl Default for GeometryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn is_usable(height: f32) -> bool {
    height.is_finite() && height > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_get() {
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);

        let outcome = cache.record(session, 1, 800.0, HeightSource::FirstPage);
        assert_eq!(outcome, WriteOutcome::Stored);
        assert_eq!(
            cache.get(1),
            Some(PageHeight {
                height: 800.0,
                source: HeightSource::FirstPage
            })
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reset_clears_heights_and_estimate() {
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);
        cache.set_estimate(session, 1000.0);
        cache.record(session, 2, 990.0, HeightSource::Preload);

        cache.reset(1.25);
        assert!(cache.is_empty());
        assert_eq!(cache.estimate(), None);
        assert_eq!(cache.scale(), 1.25);
        assert_eq!(cache.stats().resets, 2);
    }

    #[test]
    fn test_stale_session_write_rejected() {
        let cache = GeometryCache::new();
        let old = cache.reset(1.0);
        let new = cache.reset(1.0);
        assert_ne!(old, new);

        assert_eq!(
            cache.record(old, 4, 700.0, HeightSource::Preload),
            WriteOutcome::Stale
        );
        assert!(!cache.set_estimate(old, 700.0));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().stale_writes, 2);
    }

    #[test]
    fn test_rendered_height_is_authoritative() {
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);

        cache.record(session, 7, 1010.0, HeightSource::Preload);
        cache.record(session, 7, 1024.0, HeightSource::Rendered);
        assert_eq!(cache.height(7), Some(1024.0));

        let outcome = cache.record(session, 7, 999.0, HeightSource::Preload);
        assert_eq!(outcome, WriteOutcome::Shadowed);
        assert_eq!(cache.height(7), Some(1024.0));

        cache.record(session, 7, 1030.0, HeightSource::Rendered);
        assert_eq!(cache.height(7), Some(1030.0));
    }

    #[test]
    fn test_invalid_heights_ignored() {
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);

        assert_eq!(cache.record(session, 1, 0.0, HeightSource::Rendered), WriteOutcome::Invalid);
        assert_eq!(cache.record(session, 1, f32::NAN, HeightSource::Rendered), WriteOutcome::Invalid);
        assert_eq!(cache.record(session, 1, -5.0, HeightSource::Preload), WriteOutcome::Invalid);
        assert!(!cache.set_estimate(session, f32::INFINITY));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_height_or_estimate_fallbacks() {
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);

        assert_eq!(cache.height_or_estimate(3, 1100.0), 1100.0);

        cache.set_estimate(session, 900.0);
        assert_eq!(cache.height_or_estimate(3, 1100.0), 900.0);

        cache.record(session, 3, 950.0, HeightSource::Preload);
        assert_eq!(cache.height_or_estimate(3, 1100.0), 950.0);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_resolve_all_mixes_measured_and_estimate() {
        let cache = GeometryCache::new();
        let session = cache.reset(1.0);
        cache.set_estimate(session, 100.0);
        cache.record(session, 2, 150.0, HeightSource::Rendered);

        assert_eq!(cache.resolve_all(3, 50.0), vec![100.0, 150.0, 100.0]);
        assert!(cache.resolve_all(0, 50.0).is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let cache = GeometryCache::new();
        let handle = cache.clone();
        let session = cache.reset(1.0);

        handle.record(session, 1, 500.0, HeightSource::FirstPage);
        assert!(cache.contains(1));
    }
}
