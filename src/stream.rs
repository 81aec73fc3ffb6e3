//! Annotated JPEG stream.
//!
//! The encoder draws detection boxes and an occupancy banner onto a copy of
//! the source frame, compresses it to JPEG and publishes the result to a
//! latest-frame slot. Viewers hold independent `FrameStream` cursors over
//! that slot; a slow viewer skips frames instead of applying backpressure,
//! and viewers never mutate pipeline state.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::detect::DetectionResult;
use crate::frame::{Frame, RGB_CHANNELS};
use crate::occupancy::OccupancySnapshot;
use crate::slot::LatestSlot;

const BOX_COLOR: [u8; 3] = [0, 220, 60];
const BANNER_NORMAL: [u8; 3] = [30, 30, 30];
const BANNER_ALERT: [u8; 3] = [200, 30, 30];
const TICK_COLOR: [u8; 3] = [240, 240, 240];
const BANNER_HEIGHT: u32 = 14;
const BOX_STROKE: u32 = 2;

/// One compressed, annotated frame ready for delivery.
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    /// Capture sequence of the source frame.
    pub seq: u64,
    pub captured_at: SystemTime,
}

/// Draws overlays and encodes frames for viewers.
pub struct StreamEncoder {
    slot: Arc<LatestSlot<EncodedFrame>>,
    quality: u8,
}

impl StreamEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            slot: Arc::new(LatestSlot::new()),
            quality,
        }
    }

    /// Annotate, compress and publish one frame. The raw frame is not
    /// modified; annotation happens on a copy.
    pub fn publish(
        &self,
        frame: &Frame,
        result: &DetectionResult,
        snapshot: &OccupancySnapshot,
    ) -> Result<()> {
        let mut canvas = frame.pixels().to_vec();
        let (w, h) = (frame.width, frame.height);

        for det in &result.detections {
            draw_box(&mut canvas, w, h, det.x, det.y, det.w, det.h);
        }
        draw_banner(&mut canvas, w, h, snapshot);

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode(&canvas, w, h, ExtendedColorType::Rgb8)
            .context("jpeg encoding failed")?;

        self.slot.publish(EncodedFrame {
            jpeg,
            seq: frame.seq,
            captured_at: frame.captured_at,
        });
        Ok(())
    }

    /// A new independent viewer cursor starting at the live edge.
    pub fn subscribe(&self) -> FrameStream {
        FrameStream {
            slot: self.slot.clone(),
            last_seq: 0,
        }
    }

    pub fn close(&self) {
        self.slot.close();
    }
}

/// Per-viewer cursor over the encoded-frame slot.
///
/// Each cursor tracks the last slot sequence it delivered, so a viewer sees
/// every frame at most once and always resumes at the newest one.
pub struct FrameStream {
    slot: Arc<LatestSlot<EncodedFrame>>,
    last_seq: u64,
}

impl FrameStream {
    /// Next frame newer than the last one delivered, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout or after the pipeline stops.
    pub fn next(&mut self, timeout: Duration) -> Option<Arc<EncodedFrame>> {
        let (seq, frame) = self.slot.wait_newer(self.last_seq, timeout)?;
        self.last_seq = seq;
        Some(frame)
    }
}

fn put_pixel(canvas: &mut [u8], width: u32, x: u32, y: u32, color: [u8; 3]) {
    let idx = (y as usize * width as usize + x as usize) * RGB_CHANNELS;
    canvas[idx..idx + RGB_CHANNELS].copy_from_slice(&color);
}

/// Stroke a normalized-coordinate rectangle onto the canvas.
fn draw_box(canvas: &mut [u8], width: u32, height: u32, x: f32, y: f32, w: f32, h: f32) {
    let clamp = |v: f32, max: u32| ((v.clamp(0.0, 1.0) * max as f32) as u32).min(max - 1);
    let x0 = clamp(x, width);
    let y0 = clamp(y, height);
    let x1 = clamp(x + w, width);
    let y1 = clamp(y + h, height);
    if x1 <= x0 || y1 <= y0 {
        return;
    }

    for dy in 0..BOX_STROKE.min(y1 - y0) {
        for px in x0..=x1 {
            put_pixel(canvas, width, px, y0 + dy, BOX_COLOR);
            put_pixel(canvas, width, px, y1 - dy, BOX_COLOR);
        }
    }
    for dx in 0..BOX_STROKE.min(x1 - x0) {
        for py in y0..=y1 {
            put_pixel(canvas, width, x0 + dx, py, BOX_COLOR);
            put_pixel(canvas, width, x1 - dx, py, BOX_COLOR);
        }
    }
}

/// Status banner along the top edge: red background while an alert is
/// active, one tick mark per counted person.
fn draw_banner(canvas: &mut [u8], width: u32, height: u32, snapshot: &OccupancySnapshot) {
    let banner_h = BANNER_HEIGHT.min(height);
    let background = if snapshot.alert_active {
        BANNER_ALERT
    } else {
        BANNER_NORMAL
    };
    for y in 0..banner_h {
        for x in 0..width {
            put_pixel(canvas, width, x, y, background);
        }
    }

    // Tick marks: 4px wide, 2px apart, capped at the frame width.
    let tick_top = 3.min(banner_h.saturating_sub(1));
    let tick_bottom = banner_h.saturating_sub(3).max(tick_top);
    for i in 0..snapshot.count {
        let x0 = 4 + i * 6;
        if x0 + 4 > width {
            break;
        }
        for y in tick_top..=tick_bottom {
            for x in x0..x0 + 4 {
                put_pixel(canvas, width, x, y, TICK_COLOR);
            }
        }
    }
}
