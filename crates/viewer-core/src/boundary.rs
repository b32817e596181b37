//! Scroll boundary guard
//!
//! The mounted window is deliberately smaller than the document, so scrolling
//! is confined to the span between the first and the last mounted page. A
//! scroll that would leave that span in its direction of travel is clamped,
//! and one self-clearing notice is raised per boundary contact.

use crate::layout::PageLayout;
use crate::window::MountedSet;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Text of the boundary notice
pub const BOUNDARY_NOTICE: &str =
    "Reached the edge of the loaded range. Pick a node to jump elsewhere.";

/// Which edge of the mounted range was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Top,
    Bottom,
}

/// Allowed scroll range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollBounds {
    pub min: f32,
    pub max: f32,
}

impl ScrollBounds {
    /// Bounds spanned by the first and last mounted placeholders.
    ///
    /// `max` never falls below `min`, so a mounted range shorter than the
    /// container pins the scroll position to its top.
    pub fn from_layout(layout: &PageLayout, mounted: &MountedSet, container_height: f32) -> Option<Self> {
        let min = layout.top(mounted.first()?)?;
        let bottom = layout.bottom(mounted.last()?)?;
        Some(Self {
            min,
            max: (bottom - container_height).max(min),
        })
    }

    pub fn contains(&self, offset: f32) -> bool {
        offset >= self.min && offset <= self.max
    }
}

/// A transient informational notice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub edge: Edge,
    pub message: String,
}

/// Result of guarding one scroll movement
#[derive(Debug, Clone, PartialEq)]
pub struct GuardOutcome {
    /// Scroll position after guarding
    pub scroll_top: f32,
    /// Whether the native movement must not propagate past the boundary
    pub prevented: bool,
    /// Whether `scroll_top` differs from the requested position
    pub clamped: bool,
    /// Notice raised by this movement, if it started a boundary contact
    pub notice: Option<Notice>,
}

/// Callback invoked with the id of a notice once it expires
pub type NoticeListener = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct GuardState {
    contact: Option<Edge>,
    notice: Option<Notice>,
    next_id: u64,
    notices_raised: u64,
}

/// Confines scrolling to the mounted range.
pub struct ScrollBoundaryGuard {
    ttl: Duration,
    state: Arc<Mutex<GuardState>>,
    on_clear: Arc<Mutex<Option<NoticeListener>>>,
}

impl ScrollBoundaryGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Arc::new(Mutex::new(GuardState::default())),
            on_clear: Arc::new(Mutex::new(None)),
        }
    }

    /// Install the callback run when a notice expires
    pub fn set_clear_listener(&self, listener: NoticeListener) {
        *self.on_clear.lock() = Some(listener);
    }

    /// Guard a movement from `current` to `requested`.
    ///
    /// Raising a notice spawns its expiry timer, so a tokio runtime must be
    /// running when a movement can hit a boundary.
    pub fn guard(&self, current: f32, requested: f32, bounds: Option<ScrollBounds>) -> GuardOutcome {
        let Some(bounds) = bounds else {
            return GuardOutcome {
                scroll_top: requested,
                prevented: false,
                clamped: false,
                notice: None,
            };
        };

        let hit = if requested < current && requested < bounds.min {
            Some((Edge::Top, bounds.min))
        } else if requested > current && requested > bounds.max {
            Some((Edge::Bottom, bounds.max))
        } else {
            None
        };

        let Some((edge, clamped_to)) = hit else {
            let mut state = self.state.lock();
            if requested > bounds.min && requested < bounds.max {
                state.contact = None;
            }
            return GuardOutcome {
                scroll_top: requested,
                prevented: false,
                clamped: false,
                notice: None,
            };
        };

        let notice = {
            let mut state = self.state.lock();
            if state.contact == Some(edge) {
                None
            } else {
                state.contact = Some(edge);
                state.next_id += 1;
                state.notices_raised += 1;
                let notice = Notice {
                    id: state.next_id,
                    edge,
                    message: BOUNDARY_NOTICE.to_string(),
                };
                state.notice = Some(notice.clone());
                Some(notice)
            }
        };

        debug!(?edge, requested, clamped_to, "scroll clamped to mounted range");
        if let Some(notice) = &notice {
            self.schedule_clear(notice.id);
        }

        GuardOutcome {
            scroll_top: clamped_to,
            prevented: true,
            clamped: true,
            notice,
        }
    }

    fn schedule_clear(&self, id: u64) {
        let state = self.state.clone();
        let on_clear = self.on_clear.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let cleared = {
                let mut state = state.lock();
                match &state.notice {
                    Some(notice) if notice.id == id => {
                        state.notice = None;
                        true
                    }
                    _ => false,
                }
            };
            if cleared {
                let listener = on_clear.lock().clone();
                if let Some(listener) = listener {
                    listener(id);
                }
            }
        });
    }

    /// End the current boundary contact (programmatic scroll, new document)
    pub fn release(&self) {
        self.state.lock().contact = None;
    }

    /// Drop contact state and any visible notice
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.contact = None;
        state.notice = None;
    }

    /// Notice currently shown, if any
    pub fn notice(&self) -> Option<Notice> {
        self.state.lock().notice.clone()
    }

    /// Total notices raised
    pub fn notices_raised(&self) -> u64 {
        self.state.lock().notices_raised
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn bounds() -> ScrollBounds {
        ScrollBounds { min: 1000.0, max: 4000.0 }
    }

    #[test]
    fn bounds_from_mounted_range() {
        let layout = PageLayout::new(vec![1000.0; 10], 0.0);
        let mounted: MountedSet = [3, 4, 5].into_iter().collect();
        let bounds = ScrollBounds::from_layout(&layout, &mounted, 800.0).unwrap();
        assert_eq!(bounds, ScrollBounds { min: 2000.0, max: 4200.0 });

        // short range pins to its top
        let mounted: MountedSet = [3].into_iter().collect();
        let bounds = ScrollBounds::from_layout(&layout, &mounted, 1500.0).unwrap();
        assert_eq!(bounds.max, bounds.min);

        assert!(ScrollBounds::from_layout(&layout, &MountedSet::new(), 800.0).is_none());
    }

    #[test]
    fn movement_inside_range_passes() {
        let guard = ScrollBoundaryGuard::new(Duration::from_millis(1500));
        let outcome = guard.guard(2000.0, 2500.0, Some(bounds()));
        assert_eq!(outcome.scroll_top, 2500.0);
        assert!(!outcome.prevented && !outcome.clamped);
        assert!(outcome.notice.is_none());
    }

    #[test]
    fn no_bounds_no_guarding() {
        let guard = ScrollBoundaryGuard::new(Duration::from_millis(1500));
        let outcome = guard.guard(0.0, 90_000.0, None);
        assert_eq!(outcome.scroll_top, 90_000.0);
    }

    #[test]
    fn only_direction_of_travel_is_clamped() {
        let guard = ScrollBoundaryGuard::new(Duration::from_millis(1500));
        // below the range and moving back toward it
        let outcome = guard.guard(5000.0, 4500.0, Some(bounds()));
        assert_eq!(outcome.scroll_top, 4500.0);
        assert!(!outcome.clamped);
        // above the range and moving toward it
        let outcome = guard.guard(200.0, 600.0, Some(bounds()));
        assert!(!outcome.clamped);
    }

    #[tokio::test(start_paused = true)]
    async fn one_notice_per_contact() {
        let guard = ScrollBoundaryGuard::new(Duration::from_millis(1500));

        let first = guard.guard(3900.0, 4300.0, Some(bounds()));
        assert_eq!(first.scroll_top, 4000.0);
        assert!(first.prevented);
        assert_eq!(first.notice.as_ref().map(|n| n.edge), Some(Edge::Bottom));

        // repeated wheel ticks against the same edge
        for _ in 0..5 {
            let outcome = guard.guard(4000.0, 4120.0, Some(bounds()));
            assert_eq!(outcome.scroll_top, 4000.0);
            assert!(outcome.notice.is_none());
        }
        assert_eq!(guard.notices_raised(), 1);

        // leaving the edge and coming back is a new contact
        guard.guard(4000.0, 3000.0, Some(bounds()));
        let again = guard.guard(3000.0, 4500.0, Some(bounds()));
        assert!(again.notice.is_some());
        assert_eq!(guard.notices_raised(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn notice_clears_after_ttl() {
        let guard = ScrollBoundaryGuard::new(Duration::from_millis(1500));
        let cleared = Arc::new(AtomicU64::new(0));
        let sink = cleared.clone();
        guard.set_clear_listener(Arc::new(move |id| {
            sink.store(id, Ordering::SeqCst);
        }));

        let outcome = guard.guard(1200.0, 800.0, Some(bounds()));
        assert_eq!(outcome.scroll_top, 1000.0);
        let notice = outcome.notice.unwrap();
        assert_eq!(notice.edge, Edge::Top);
        assert_eq!(notice.message, BOUNDARY_NOTICE);
        assert!(guard.notice().is_some());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(guard.notice().is_some());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(guard.notice().is_none());
        assert_eq!(cleared.load(Ordering::SeqCst), notice.id);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_hides_notice() {
        let guard = ScrollBoundaryGuard::new(Duration::from_millis(1500));
        guard.guard(1200.0, 800.0, Some(bounds()));
        guard.reset();
        assert!(guard.notice().is_none());
        // the expired timer finds nothing to clear
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(guard.notice().is_none());
    }
}
