//! Frame ingestion sources.
//!
//! Sources are swappable adapters behind the `FrameSource` trait, selected
//! at pipeline construction from the camera source string:
//! - `stub://...`: synthetic scene generator (development, tests)
//! - `rtsp://...`: IP camera stream (feature: rtsp-gstreamer)
//! - a directory path: recorded JPEG stills replayed in order
//!
//! Sources produce frames and nothing else: they do not alert, and they do
//! not log beyond connection-level messages. `next_frame` blocks with a
//! bounded wait; a stall past the configured timeout surfaces as
//! `SourceError::Unavailable` so the supervisor can reopen with backoff
//! instead of hanging the capture loop.

mod file;
pub mod rtsp;
mod stub;

pub use file::FileSource;
pub use rtsp::RtspSource;
pub use stub::StubSource;

use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::error::SourceError;
use crate::frame::Frame;

/// Capture parameters fixed for a pipeline run.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Maximum wait inside `next_frame` before the source reports itself
    /// unavailable.
    pub stall_timeout: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 10,
            stall_timeout: Duration::from_secs(2),
        }
    }
}

/// Abstracts a camera/RTSP/file input producing a bounded-rate frame
/// sequence.
pub trait FrameSource: Send + std::fmt::Debug {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Next frame, blocking up to the stall timeout.
    ///
    /// `Ok(None)` signals a clean end of stream (recorded sources only).
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Re-establish the underlying device/stream without restarting the
    /// pipeline.
    fn reopen(&mut self) -> Result<(), SourceError>;

    /// Frames produced since the source was opened.
    fn frames_captured(&self) -> u64;
}

/// Build the frame source adapter for a camera source string.
///
/// Mirrors the conventional source notation: RTSP URLs select network
/// ingest, plain paths select recorded-still ingest, and `stub://` selects
/// the synthetic generator. Integer device indices (USB cameras) are not
/// supported by this build.
pub fn open_source(source: &str, settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("camera source must not be empty"));
    }
    if trimmed.starts_with("stub://") {
        return Ok(Box::new(StubSource::new(trimmed, settings.clone())));
    }
    if trimmed.starts_with("rtsp://") {
        return Ok(Box::new(RtspSource::new(trimmed, settings.clone())?));
    }
    if trimmed.parse::<u32>().is_ok() {
        return Err(anyhow!(
            "USB device index '{}' is not supported by this build; \
             use an rtsp:// URL, a frame directory, or stub://",
            trimmed
        ));
    }
    if trimmed.contains("://") {
        return Err(anyhow!("unsupported source scheme in '{}'", trimmed));
    }
    Ok(Box::new(FileSource::new(trimmed, settings.clone())?))
}
