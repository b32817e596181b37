//! Mounted-page windowing
//!
//! Keeps a bounded set of pages mounted around the page the user is looking
//! at. Center requests from scrolling are debounced; each recompute unions
//! the window around the new center with the pages already mounted and, if
//! the union exceeds the cap, keeps the pages nearest to the center.

use parking_lot::Mutex;
use pageflow_scheduler::Debouncer;
use serde::Serialize;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Pages currently allocated for rendering (1-based, ascending)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MountedSet(BTreeSet<u32>);

impl MountedSet {
    /// An empty set
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, page: u32) -> bool {
        self.0.contains(&page)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowest mounted page
    pub fn first(&self) -> Option<u32> {
        self.0.first().copied()
    }

    /// Highest mounted page
    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.0.iter().copied().collect()
    }
}

impl FromIterator<u32> for MountedSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Pages within `buffer` of `center`, clamped to `[1, page_count]`.
pub fn window_range(center: u32, buffer: u32, page_count: u32) -> RangeInclusive<u32> {
    let center = center.clamp(1, page_count.max(1));
    let start = center.saturating_sub(buffer).max(1);
    let end = center.saturating_add(buffer).min(page_count);
    start..=end
}

/// Half-width needed for a window to span more than the container.
///
/// A window of `2 * buffer + 1` pages of `page_extent` (height plus gap)
/// must exceed `container_height` by at least one page, otherwise the scroll
/// range it allows keeps the viewport centered on the same page and the
/// window can never move. Never less than `min_buffer`.
pub fn buffer_for_container(container_height: f32, page_extent: f32, min_buffer: u32) -> u32 {
    let usable = |value: f32| value > 0.0;
    if !usable(container_height) || !usable(page_extent) {
        return min_buffer;
    }
    let needed = (container_height / (2.0 * page_extent)).ceil();
    if needed.is_finite() {
        min_buffer.max(needed.min(u32::MAX as f32) as u32)
    } else {
        min_buffer
    }
}

/// New mounted set for a center request.
///
/// The union keeps previously mounted pages first (ascending), followed by
/// the newly windowed pages. When it exceeds `max_mounted`, a stable sort by
/// distance to `center` decides which pages survive, so ties keep that order.
pub fn compute_window(
    center: u32,
    previous: &MountedSet,
    buffer: u32,
    max_mounted: usize,
    page_count: u32,
) -> MountedSet {
    if page_count == 0 || max_mounted == 0 {
        return MountedSet::new();
    }
    let center = center.clamp(1, page_count);

    let mut union: Vec<u32> = previous.iter().filter(|page| *page <= page_count).collect();
    for page in window_range(center, buffer, page_count) {
        if !previous.contains(page) {
            union.push(page);
        }
    }

    if union.len() > max_mounted {
        union.sort_by_key(|page| page.abs_diff(center));
        union.truncate(max_mounted);
    }

    union.into_iter().collect()
}

/// A committed change of the mounted set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowChange {
    /// Center the recompute was made for
    pub center: u32,
    /// The new mounted set
    pub mounted: MountedSet,
    /// Pages that need render resources allocated
    pub added: Vec<u32>,
    /// Pages whose render resources should be released
    pub removed: Vec<u32>,
}

/// Callback invoked after every committed change
pub type WindowListener = Arc<dyn Fn(&WindowChange) + Send + Sync>;

struct WindowState {
    mounted: MountedSet,
    page_count: u32,
    last_center: Option<u32>,
    recomputes: u64,
    buffer_pages: u32,
}

struct WindowCore {
    state: Mutex<WindowState>,
    listener: Mutex<Option<WindowListener>>,
    max_mounted_pages: usize,
}

impl WindowCore {
    fn apply(&self, center: u32) -> Option<WindowChange> {
        let change = {
            let mut state = self.state.lock();
            if state.page_count == 0 {
                return None;
            }
            let next = compute_window(
                center,
                &state.mounted,
                state.buffer_pages,
                self.max_mounted_pages,
                state.page_count,
            );
            state.recomputes += 1;
            state.last_center = Some(center);

            if next == state.mounted {
                return None;
            }

            let added = next.iter().filter(|page| !state.mounted.contains(*page)).collect();
            let removed = state.mounted.iter().filter(|page| !next.contains(*page)).collect();
            state.mounted = next.clone();
            WindowChange {
                center,
                mounted: next,
                added,
                removed,
            }
        };

        debug!(
            center,
            mounted = change.mounted.len(),
            added = ?change.added,
            removed = ?change.removed,
            "window recomputed"
        );

        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(&change);
        }
        Some(change)
    }
}

/// Owner of the mounted set.
///
/// Membership only changes through this type. Requests made while no
/// document is loaded (page count 0) are ignored.
pub struct ViewportWindowManager {
    core: Arc<WindowCore>,
    debouncer: Debouncer,
}

impl ViewportWindowManager {
    /// Create a window manager
    ///
    /// # Arguments
    ///
    /// * `buffer_pages` - Pages mounted on each side of the center
    /// * `max_mounted_pages` - Cap on the mounted set (at least 1)
    /// * `debounce` - Coalescing interval for [`request_center`](Self::request_center)
    pub fn new(buffer_pages: u32, max_mounted_pages: usize, debounce: Duration) -> Self {
        Self {
            core: Arc::new(WindowCore {
                state: Mutex::new(WindowState {
                    mounted: MountedSet::new(),
                    page_count: 0,
                    last_center: None,
                    recomputes: 0,
                    buffer_pages,
                }),
                listener: Mutex::new(None),
                max_mounted_pages: max_mounted_pages.max(1),
            }),
            debouncer: Debouncer::new(debounce),
        }
    }

    /// Install the callback that receives every committed change
    pub fn set_listener(&self, listener: WindowListener) {
        *self.core.listener.lock() = Some(listener);
    }

    /// Empty the mounted set for a document with `page_count` pages and drop
    /// any pending request.
    pub fn reset(&self, page_count: u32) {
        self.debouncer.cancel();
        let mut state = self.core.state.lock();
        state.mounted = MountedSet::new();
        state.page_count = page_count;
        state.last_center = None;
    }

    /// Debounced center request: only the last call of a burst is applied.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request_center(&self, page: u32) {
        let core = self.core.clone();
        self.debouncer.call(move || {
            core.apply(page);
        });
    }

    /// Recompute immediately around `page`, dropping any pending request.
    pub fn force_center(&self, page: u32) -> Option<WindowChange> {
        self.debouncer.cancel();
        self.core.apply(page)
    }

    /// Change the half-width used by later recomputes
    pub fn set_buffer_pages(&self, buffer_pages: u32) {
        let mut state = self.core.state.lock();
        if state.buffer_pages != buffer_pages {
            debug!(from = state.buffer_pages, to = buffer_pages, "window buffer changed");
            state.buffer_pages = buffer_pages;
        }
    }

    /// Current mounted set
    pub fn mounted(&self) -> MountedSet {
        self.core.state.lock().mounted.clone()
    }

    /// Page count of the current document (0 when none)
    pub fn page_count(&self) -> u32 {
        self.core.state.lock().page_count
    }

    /// Center of the most recent recompute
    pub fn last_center(&self) -> Option<u32> {
        self.core.state.lock().last_center
    }

    /// Number of recomputes that ran
    pub fn recomputes(&self) -> u64 {
        self.core.state.lock().recomputes
    }

    pub fn max_mounted_pages(&self) -> usize {
        self.core.max_mounted_pages
    }
}
