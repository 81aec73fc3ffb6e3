//! crowdd - crowd occupancy monitoring daemon
//!
//! This daemon:
//! 1. Opens the configured camera source (RTSP, recorded stills, or stub)
//! 2. Runs person detection at a bounded rate, newest frame first
//! 3. Debounces counts and raises/clears crowd threshold alerts
//! 4. Publishes a live snapshot and an annotated JPEG stream
//! 5. Reopens a lost source with backoff; stops only on fatal model failure

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use crowdwatch::{
    open_source, CaptureSettings, CrowddConfig, Detector, LogAlertSink, LogObservability,
    PipelineSupervisor, StubBackend,
};

/// Crowd occupancy monitoring daemon.
#[derive(Parser, Debug)]
#[command(name = "crowdd", version, about)]
struct Args {
    /// Camera source: rtsp:// URL, a directory of JPEG stills, or stub://
    #[arg(long, env = "CAMERA_SOURCE")]
    source: Option<String>,

    /// ONNX detection model path (omit to use the stub detector)
    #[arg(long, env = "DETECTION_MODEL")]
    model: Option<String>,

    /// Occupancy threshold that raises a crowd alert
    #[arg(long)]
    threshold: Option<u32>,

    /// Minimum detection confidence in [0, 1]
    #[arg(long)]
    confidence: Option<f32>,

    /// Target capture rate in frames per second
    #[arg(long)]
    fps: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = CrowddConfig::load()?;
    apply_args(&mut config, &args)?;

    let settings = CaptureSettings {
        width: config.pipeline.width,
        height: config.pipeline.height,
        target_fps: config.pipeline.target_fps,
        stall_timeout: config.pipeline.stall_timeout,
    };
    let source = open_source(&config.camera_source, &settings)?;
    let detector = build_detector(config.model_path.as_deref())?;

    log::info!(
        "crowdd v{} source={} backend={} threshold={} window={}",
        env!("CARGO_PKG_VERSION"),
        config.camera_source,
        detector.backend_name(),
        config.pipeline.threshold,
        config.pipeline.debounce_window,
    );

    let handle = PipelineSupervisor::start(
        source,
        detector,
        config.pipeline,
        Box::new(LogAlertSink),
        Box::new(LogObservability),
    )
    .map_err(|e| anyhow!("pipeline start failed: {e}"))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("failed to install signal handler")?;
    }

    let mut last_health_log = Instant::now();
    while !interrupted.load(Ordering::SeqCst) && !handle.is_stopped() {
        std::thread::sleep(Duration::from_millis(100));

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let snap = handle.snapshot();
            let stats = handle.stats();
            log::info!(
                "health count={} alert={} frames={} dropped={} inferences={} failed={}",
                snap.count,
                snap.alert_active,
                stats.frames_submitted,
                stats.frames_dropped,
                stats.inferences_ok,
                stats.inferences_failed,
            );
            last_health_log = Instant::now();
        }
    }

    log::info!("shutting down");
    handle.stop();

    if let Some(fault) = handle.fault() {
        return Err(anyhow!("pipeline stopped on fatal error: {fault}"));
    }
    Ok(())
}

fn apply_args(config: &mut CrowddConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        config.camera_source = source.clone();
    }
    if let Some(model) = &args.model {
        config.model_path = Some(model.clone());
    }
    if let Some(threshold) = args.threshold {
        config.pipeline.threshold = threshold;
    }
    if let Some(confidence) = args.confidence {
        config.pipeline.confidence = confidence;
    }
    if let Some(fps) = args.fps {
        config.pipeline.target_fps = fps;
    }
    config
        .pipeline
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {e}"))
}

#[cfg(feature = "backend-tract")]
fn build_detector(model_path: Option<&str>) -> Result<Detector> {
    match model_path {
        Some(path) => Ok(Detector::new(Box::new(crowdwatch::TractBackend::new(
            path,
        )?))),
        None => Ok(Detector::new(Box::new(StubBackend::new()))),
    }
}

#[cfg(not(feature = "backend-tract"))]
fn build_detector(model_path: Option<&str>) -> Result<Detector> {
    if let Some(path) = model_path {
        return Err(anyhow!(
            "detection model '{}' configured, but this build has no ONNX support; \
             rebuild with --features backend-tract",
            path
        ));
    }
    Ok(Detector::new(Box::new(StubBackend::new())))
}
