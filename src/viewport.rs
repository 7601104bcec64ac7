/// Scroll offsets within this many display units of the end count as "at
/// the end" for scroll restoration.
pub const END_PROXIMITY: f32 = 100.0;

/// Layout metrics of the rendered message list at one instant. The tracker
/// is a pure query over these; nothing is cached between calls.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewportMetrics {
    pub content_height: f32,
    pub viewport_height: f32,
    pub scroll_offset: f32,
    pub row_count: usize,
}

/// True when the viewport is scrolled to (or near) the end of the list, or
/// when there is nothing to scroll past.
pub fn is_at_end(metrics: ViewportMetrics) -> bool {
    if metrics.row_count == 0 {
        return true;
    }
    metrics.content_height - metrics.viewport_height <= metrics.scroll_offset + END_PROXIMITY
}
