//! RTSP frame source (IP cameras).
//!
//! Uses a GStreamer `rtspsrc ! decodebin ! videoconvert ! appsink` pipeline
//! configured for RGB output with a single-buffer, drop-oldest appsink, the
//! same latest-wins policy the in-process scheduler applies. Gated behind
//! the `rtsp-gstreamer` feature; building without it turns construction
//! into an error so `open_source` can explain the missing feature.

#[cfg(feature = "rtsp-gstreamer")]
use std::time::SystemTime;

use anyhow::Result;
#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
#[cfg(feature = "rtsp-gstreamer")]
use gstreamer::prelude::*;

use crate::error::SourceError;
use crate::frame::Frame;
use crate::ingest::{CaptureSettings, FrameSource};

#[derive(Debug)]
pub struct RtspSource {
    url: String,
    #[cfg(feature = "rtsp-gstreamer")]
    inner: GstreamerRtsp,
    frame_count: u64,
}

impl RtspSource {
    #[cfg(feature = "rtsp-gstreamer")]
    pub fn new(url: &str, settings: CaptureSettings) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            inner: GstreamerRtsp::open(url, &settings)?,
            frame_count: 0,
        })
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    pub fn new(url: &str, _settings: CaptureSettings) -> Result<Self> {
        anyhow::bail!(
            "RTSP source '{}' requires the rtsp-gstreamer feature",
            url
        )
    }
}

impl FrameSource for RtspSource {
    fn describe(&self) -> String {
        format!("{} (rtsp)", self.url)
    }

    #[cfg(feature = "rtsp-gstreamer")]
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let frame = self
            .inner
            .pull_frame()
            .map_err(|e| SourceError::Unavailable(format!("{e:#}")))?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Err(SourceError::Unavailable(
            "rtsp-gstreamer feature not built".to_string(),
        ))
    }

    #[cfg(feature = "rtsp-gstreamer")]
    fn reopen(&mut self) -> Result<(), SourceError> {
        self.inner
            .restart()
            .map_err(|e| SourceError::Unavailable(format!("{e:#}")))?;
        log::info!("RtspSource: reopened {}", self.url);
        Ok(())
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    fn reopen(&mut self) -> Result<(), SourceError> {
        Err(SourceError::Unavailable(
            "rtsp-gstreamer feature not built".to_string(),
        ))
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(feature = "rtsp-gstreamer")]
#[derive(Debug)]
struct GstreamerRtsp {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    stall_timeout: gstreamer::ClockTime,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtsp {
    fn open(url: &str, settings: &CaptureSettings) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;

        Ok(Self {
            pipeline,
            appsink,
            stall_timeout: gstreamer::ClockTime::from_mseconds(
                settings.stall_timeout.as_millis() as u64
            ),
        })
    }

    fn pull_frame(&mut self) -> Result<Frame> {
        self.poll_bus()?;

        let sample = self
            .appsink
            .try_pull_sample(self.stall_timeout)
            .ok_or_else(|| anyhow::anyhow!("RTSP stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Frame::new(pixels, width, height, SystemTime::now())
    }

    fn restart(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Null)
            .context("reset RTSP pipeline")?;
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("restart RTSP pipeline")?;
        Ok(())
    }

    fn poll_bus(&mut self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow::anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    return Err(anyhow::anyhow!("gstreamer reached EOS"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
