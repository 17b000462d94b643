//! Picture-in-picture compositing
//!
//! Draws the most recent camera frame as a circular bubble in the
//! bottom-right corner of each screen frame.

use crate::recorder::source::VideoFrame;
use parking_lot::Mutex;
use std::sync::Arc;

/// Bubble diameter as a fraction of the screen width
pub const OVERLAY_SCALE: f64 = 0.2;

/// Pixels between the bubble and the frame edges
pub const OVERLAY_MARGIN: u32 = 20;

/// Composites the latest secondary frame over primary frames
///
/// The cache holds one frame and is overwritten on every update, so the
/// camera image is whatever arrived last, not the one closest in time.
pub struct Compositor {
    latest: Mutex<Option<Arc<VideoFrame>>>,
    scale: f64,
    margin: u32,
}

impl Compositor {
    pub fn new() -> Self {
        Self::with_layout(OVERLAY_SCALE, OVERLAY_MARGIN)
    }

    pub fn with_layout(scale: f64, margin: u32) -> Self {
        Self {
            latest: Mutex::new(None),
            scale,
            margin,
        }
    }

    /// Replace the cached secondary frame
    pub fn update_secondary(&self, frame: VideoFrame) {
        if !frame.is_well_formed() {
            tracing::debug!(
                "Ignoring malformed camera frame: {} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            );
            return;
        }
        *self.latest.lock() = Some(Arc::new(frame));
    }

    pub fn has_secondary(&self) -> bool {
        self.latest.lock().is_some()
    }

    /// Forget the cached frame
    pub fn clear(&self) {
        *self.latest.lock() = None;
    }

    /// Composite onto `primary`, or hand it back untouched when no
    /// secondary frame has been seen
    pub fn composite(&self, mut primary: VideoFrame) -> VideoFrame {
        // Clone the Arc so the blend runs without holding the lock
        let Some(secondary) = self.latest.lock().clone() else {
            return primary;
        };
        if primary.is_well_formed() {
            draw_circular_overlay(&mut primary, &secondary, self.scale, self.margin);
        }
        primary
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

/// Draw `overlay` center-cropped into a circle in the bottom-right corner
pub fn draw_circular_overlay(frame: &mut VideoFrame, overlay: &VideoFrame, scale: f64, margin: u32) {
    let side = (frame.width as f64 * scale) as u32;
    if side == 0
        || overlay.width == 0
        || overlay.height == 0
        || side + margin > frame.width
        || side + margin > frame.height
    {
        return;
    }

    let dest_x = frame.width - side - margin;
    let dest_y = frame.height - side - margin;

    // Center-crop the overlay to a square
    let crop = overlay.width.min(overlay.height);
    let crop_x = (overlay.width - crop) / 2;
    let crop_y = (overlay.height - crop) / 2;

    let radius = side as f64 / 2.0;

    for dy in 0..side {
        for dx in 0..side {
            let coverage = circle_coverage(dx, dy, radius);
            if coverage <= 0.0 {
                continue;
            }

            // Nearest-neighbour sample from the cropped square
            let src_x = (crop_x + (dx as u64 * crop as u64 / side as u64) as u32).min(overlay.width - 1);
            let src_y = (crop_y + (dy as u64 * crop as u64 / side as u64) as u32).min(overlay.height - 1);
            let src_idx = ((src_y * overlay.width + src_x) * 4) as usize;
            let dest_idx = (((dest_y + dy) * frame.width + dest_x + dx) * 4) as usize;

            if src_idx + 3 >= overlay.data.len() || dest_idx + 3 >= frame.data.len() {
                continue;
            }

            let src_a = overlay.data[src_idx + 3] as f32 / 255.0;
            let alpha = coverage * src_a;
            if alpha <= 0.0 {
                continue;
            }

            for c in 0..3 {
                let src = overlay.data[src_idx + c] as f32;
                let dst = frame.data[dest_idx + c] as f32;
                let out = src * alpha + dst * (1.0 - alpha);
                frame.data[dest_idx + c] = out.round().clamp(0.0, 255.0) as u8;
            }
            frame.data[dest_idx + 3] = 255;
        }
    }
}

/// Fraction of pixel (x, y) covered by a circle of `radius` centered in
/// its square, with a one-pixel soft edge
fn circle_coverage(x: u32, y: u32, radius: f64) -> f32 {
    let fx = x as f64 + 0.5 - radius;
    let fy = y as f64 + 0.5 - radius;
    let distance = (fx * fx + fy * fy).sqrt();
    (radius - distance + 0.5).clamp(0.0, 1.0) as f32
}
