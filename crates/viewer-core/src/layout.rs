//! Placeholder layout
//!
//! Every page has a placeholder in the scroll container whether or not it is
//! mounted. Placeholders are stacked vertically with a fixed gap; their
//! heights come from the geometry cache, falling back to the estimate.

/// Vertical positions of all page placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    tops: Vec<f32>,
    heights: Vec<f32>,
}

impl PageLayout {
    /// Stack `heights` (page 1 first) with `gap` pixels between pages.
    pub fn new(heights: Vec<f32>, gap: f32) -> Self {
        let mut tops = Vec::with_capacity(heights.len());
        let mut cursor = 0.0;
        for height in &heights {
            tops.push(cursor);
            cursor += height + gap;
        }
        Self { tops, heights }
    }

    /// Number of placeholders
    pub fn page_count(&self) -> u32 {
        self.heights.len() as u32
    }

    /// Whether `page` (1-based) has a placeholder
    pub fn contains(&self, page: u32) -> bool {
        page >= 1 && page <= self.page_count()
    }

    /// Top offset of `page`
    pub fn top(&self, page: u32) -> Option<f32> {
        self.tops.get(page.checked_sub(1)? as usize).copied()
    }

    /// Placeholder height of `page`
    pub fn height(&self, page: u32) -> Option<f32> {
        self.heights.get(page.checked_sub(1)? as usize).copied()
    }

    /// Bottom offset of `page`
    pub fn bottom(&self, page: u32) -> Option<f32> {
        Some(self.top(page)? + self.height(page)?)
    }

    /// Height of the whole stack
    pub fn total_height(&self) -> f32 {
        match (self.tops.last(), self.heights.last()) {
            (Some(top), Some(height)) => top + height,
            _ => 0.0,
        }
    }

    /// Page whose placeholder (or the gap after it) contains `offset`.
    pub fn page_at_offset(&self, offset: f32) -> Option<u32> {
        if self.heights.is_empty() {
            return None;
        }
        let offset = offset.max(0.0);
        let index = self.tops.partition_point(|top| *top <= offset);
        Some(index.max(1) as u32)
    }

    /// Iterate `(page, top, height)` for every placeholder
    pub fn iter(&self) -> impl Iterator<Item = (u32, f32, f32)> + '_ {
        self.tops
            .iter()
            .zip(&self.heights)
            .enumerate()
            .map(|(index, (top, height))| (index as u32 + 1, *top, *height))
    }
}
