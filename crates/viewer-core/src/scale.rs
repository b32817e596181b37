//! Effective scale derivation
//!
//! The host asks for a scale; the engine renders at an *effective* scale that
//! is clamped to the configured limits and never wider than the container.

use crate::config::EngineConfig;

/// Scale that fits a page of `page_width` (at scale 1.0) into the container.
///
/// Returns `None` when either width is unknown or degenerate.
pub fn fit_width_scale(container_width: f32, page_width: f32, padding: f32) -> Option<f32> {
    if container_width <= 0.0 || page_width <= 0.0 || !container_width.is_finite() {
        return None;
    }
    let usable = (container_width - padding).max(1.0);
    Some(usable / page_width)
}

/// Effective render scale.
///
/// Clamps `requested` into `[min_scale, max_scale]`, then caps it at the
/// fit-width scale when the container and page widths are known. The result
/// is rounded to 1/1000 so tiny container jitter does not invalidate geometry.
pub fn effective_scale(
    requested: f32,
    container_width: f32,
    base_page_width: Option<f32>,
    config: &EngineConfig,
) -> f32 {
    let requested = if requested.is_finite() && requested > 0.0 {
        requested
    } else {
        1.0
    };
    let mut scale = requested.clamp(config.min_scale, config.max_scale);

    if let Some(fit) = base_page_width
        .and_then(|width| fit_width_scale(container_width, width, config.horizontal_padding_px))
    {
        scale = scale.min(fit).max(config.min_scale);
    }

    (scale * 1000.0).round() / 1000.0
}

/// Whether two effective scales differ enough to invalidate geometry
pub fn scale_changed(previous: f32, next: f32) -> bool {
    (previous - next).abs() >= 0.0005
}
