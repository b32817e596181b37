//! Visibility tracking
//!
//! Finds the placeholder that is most visible in the scroll container and
//! reports it as the window center. The visible area is expanded by a root
//! margin so pages just outside the viewport count as visible early.

use crate::layout::PageLayout;
use crate::window::MountedSet;
use parking_lot::Mutex;

/// Fraction of a placeholder spanning `[top, top + height]` that lies inside
/// `[view_top, view_bottom]`.
pub fn intersection_ratio(top: f32, height: f32, view_top: f32, view_bottom: f32) -> f32 {
    if height <= 0.0 {
        return 0.0;
    }
    let visible = (top + height).min(view_bottom) - top.max(view_top);
    (visible / height).clamp(0.0, 1.0)
}

/// Page with the highest intersection ratio against the viewport expanded by
/// `margin` on both sides.
///
/// Several short pages can be fully visible at once; ties go to the page
/// whose middle is nearest the middle of the viewport, then to the lower
/// page number.
pub fn most_visible(
    layout: &PageLayout,
    scroll_top: f32,
    container_height: f32,
    margin: f32,
) -> Option<u32> {
    if container_height.is_nan() || container_height <= 0.0 {
        return None;
    }
    let view_top = scroll_top - margin;
    let view_bottom = scroll_top + container_height + margin;
    let first = layout.page_at_offset(view_top)?;
    let middle = scroll_top + container_height / 2.0;

    let mut best: Option<(u32, f32, f32)> = None;
    for page in first..=layout.page_count() {
        let (Some(top), Some(height)) = (layout.top(page), layout.height(page)) else {
            break;
        };
        if top >= view_bottom {
            break;
        }
        let ratio = intersection_ratio(top, height, view_top, view_bottom);
        if ratio <= 0.0 {
            continue;
        }
        let distance = (top + height / 2.0 - middle).abs();
        let better = best.map_or(true, |(_, best_ratio, best_distance)| {
            ratio > best_ratio || (ratio == best_ratio && distance < best_distance)
        });
        if better {
            best = Some((page, ratio, distance));
        }
    }
    best.map(|(page, _, _)| page)
}

#[derive(Debug, Default)]
struct Subscription {
    page_count: u32,
    mounted: MountedSet,
    revision: u64,
    last_reported: Option<u32>,
}

/// Watches page placeholders and picks the center page.
///
/// The observer is subscribed to one placeholder list at a time, described by
/// the page count and the mounted set. Whenever either changes it
/// re-subscribes, which forgets the last reported page so the next
/// observation is reported even if it names the same page.
#[derive(Debug)]
pub struct VisibilityObserver {
    root_margin: f32,
    subscription: Mutex<Subscription>,
}

impl VisibilityObserver {
    pub fn new(root_margin: f32) -> Self {
        Self {
            root_margin,
            subscription: Mutex::new(Subscription::default()),
        }
    }

    /// Subscribe to the placeholders of `page_count` pages with `mounted`
    /// rendered. Returns `true` if this replaced the previous subscription.
    pub fn subscribe(&self, page_count: u32, mounted: &MountedSet) -> bool {
        let mut sub = self.subscription.lock();
        if sub.revision > 0 && sub.page_count == page_count && sub.mounted == *mounted {
            return false;
        }
        sub.page_count = page_count;
        sub.mounted = mounted.clone();
        sub.revision += 1;
        sub.last_reported = None;
        true
    }

    /// Drop the subscription
    pub fn reset(&self) {
        let mut sub = self.subscription.lock();
        let revision = sub.revision;
        *sub = Subscription {
            revision,
            ..Subscription::default()
        };
    }

    /// Process a visibility change and return the page to report as center.
    ///
    /// Returns `None` when nothing is subscribed, nothing is visible, or the
    /// most visible page was already reported under this subscription.
    pub fn observe(&self, layout: &PageLayout, scroll_top: f32, container_height: f32) -> Option<u32> {
        let mut sub = self.subscription.lock();
        if sub.page_count == 0 || layout.page_count() != sub.page_count {
            return None;
        }
        let page = most_visible(layout, scroll_top, container_height, self.root_margin)?;
        if sub.last_reported == Some(page) {
            return None;
        }
        sub.last_reported = Some(page);
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(pages: usize) -> PageLayout {
        PageLayout::new(vec![1000.0; pages], 16.0)
    }

    #[test]
    fn ratio_of_partially_visible_page() {
        assert_eq!(intersection_ratio(0.0, 1000.0, 0.0, 1000.0), 1.0);
        assert_eq!(intersection_ratio(0.0, 1000.0, 750.0, 2000.0), 0.25);
        assert_eq!(intersection_ratio(0.0, 1000.0, 1200.0, 2000.0), 0.0);
        assert_eq!(intersection_ratio(0.0, 0.0, 0.0, 100.0), 0.0);
    }

    #[test]
    fn picks_page_filling_viewport() {
        let layout = uniform(500);
        let top = layout.top(250).unwrap();
        assert_eq!(most_visible(&layout, top, 800.0, 200.0), Some(250));
    }

    #[test]
    fn margin_makes_neighbours_eligible() {
        let layout = PageLayout::new(vec![100.0; 20], 0.0);
        // viewport [500, 600] shows page 6 only; the margin adds 5 and 7
        assert_eq!(most_visible(&layout, 500.0, 100.0, 0.0), Some(6));
        // all of 5..=7 are fully inside [400, 700]; 6 sits in the middle
        assert_eq!(most_visible(&layout, 500.0, 100.0, 100.0), Some(6));
    }

    #[test]
    fn short_pages_tie_on_viewport_middle() {
        // 200 px pages in a 1000 px container: 1..=5 are all fully visible
        let layout = PageLayout::new(vec![200.0; 100], 16.0);
        assert_eq!(most_visible(&layout, 0.0, 1000.0, 200.0), Some(3));
        // viewport middle at 1564 falls inside page 8 ([1512, 1712])
        assert_eq!(most_visible(&layout, 1064.0, 1000.0, 200.0), Some(8));
    }

    #[test]
    fn equidistant_tie_goes_to_lower_page() {
        let layout = PageLayout::new(vec![100.0; 20], 0.0);
        // middle at 600 is the boundary between pages 6 and 7
        assert_eq!(most_visible(&layout, 500.0, 200.0, 0.0), Some(6));
    }

    #[test]
    fn no_container_no_center() {
        let layout = uniform(3);
        assert_eq!(most_visible(&layout, 0.0, 0.0, 200.0), None);
        assert_eq!(most_visible(&layout, 0.0, -50.0, 200.0), None);
        assert_eq!(most_visible(&layout, 0.0, f32::NAN, 200.0), None);
        assert_eq!(most_visible(&PageLayout::new(Vec::new(), 16.0), 0.0, 800.0, 200.0), None);
    }

    #[test]
    fn observe_requires_subscription() {
        let observer = VisibilityObserver::new(200.0);
        let layout = uniform(10);
        assert_eq!(observer.observe(&layout, 0.0, 800.0), None);

        observer.subscribe(10, &MountedSet::new());
        assert_eq!(observer.observe(&layout, 0.0, 800.0), Some(1));
    }

    #[test]
    fn repeated_observation_reported_once() {
        let observer = VisibilityObserver::new(200.0);
        let layout = uniform(10);
        observer.subscribe(10, &MountedSet::new());

        assert_eq!(observer.observe(&layout, 0.0, 800.0), Some(1));
        assert_eq!(observer.observe(&layout, 10.0, 800.0), None);
        let top = layout.top(4).unwrap();
        assert_eq!(observer.observe(&layout, top, 800.0), Some(4));
    }

    #[test]
    fn resubscribe_on_placeholder_change() {
        let observer = VisibilityObserver::new(200.0);
        let layout = uniform(10);
        assert!(observer.subscribe(10, &MountedSet::new()));
        assert!(!observer.subscribe(10, &MountedSet::new()));
        assert_eq!(observer.observe(&layout, 0.0, 800.0), Some(1));

        let mounted: MountedSet = [1, 2, 3].into_iter().collect();
        assert!(observer.subscribe(10, &mounted));
        assert!(!observer.subscribe(10, &mounted));
        // new subscription reports the same page again
        assert_eq!(observer.observe(&layout, 0.0, 800.0), Some(1));
    }

    #[test]
    fn stale_layout_ignored() {
        let observer = VisibilityObserver::new(200.0);
        observer.subscribe(10, &MountedSet::new());
        assert_eq!(observer.observe(&uniform(4), 0.0, 800.0), None);
    }
}
