//! Configuration.
//!
//! Two layers:
//! - `PipelineConfig`: the validated runtime parameters of one pipeline
//!   instance. Mutable only through `PipelineHandle::reconfigure`; readers
//!   take a copy-on-read `Arc` snapshot via `ConfigCell`, so in-flight
//!   operations finish with the values they started with.
//! - `CrowddConfig`: daemon configuration loaded from an optional JSON file
//!   with environment overrides, then validated.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::error::PipelineError;
use crate::occupancy::DEFAULT_DEBOUNCE_WINDOW;

const DEFAULT_SOURCE: &str = "stub://front_camera";
const DEFAULT_THRESHOLD: u32 = 10;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 10;
const DEFAULT_STALL_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_REOPEN_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_REOPEN_BACKOFF_MAX_MS: u64 = 30_000;
const DEFAULT_FAILURE_WINDOW: usize = 10;
const DEFAULT_FAILURE_RATIO: f32 = 0.5;
const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Runtime parameters of one pipeline instance.
///
/// There is deliberately no inference timeout: a hung model is an
/// operational failure outside the pipeline's recovery scope.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Occupancy at or above this raises a crowd alert. Must be >= 1.
    pub threshold: u32,
    /// Minimum detection confidence, in [0, 1].
    pub confidence: f32,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Consecutive agreeing results required before the accepted count moves.
    pub debounce_window: usize,
    /// Capture wait bound before the source is treated as unavailable.
    pub stall_timeout: Duration,
    /// First reopen delay after a source failure; doubles per attempt.
    pub reopen_backoff_base: Duration,
    /// Reopen delay ceiling. Retries continue indefinitely at this pace.
    pub reopen_backoff_max: Duration,
    /// Attempts considered when judging whether the model itself is broken.
    pub failure_window: usize,
    /// Failure ratio over the window that escalates to a fatal stop.
    pub failure_ratio: f32,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            confidence: DEFAULT_CONFIDENCE,
            target_fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            stall_timeout: Duration::from_millis(DEFAULT_STALL_TIMEOUT_MS),
            reopen_backoff_base: Duration::from_millis(DEFAULT_REOPEN_BACKOFF_BASE_MS),
            reopen_backoff_max: Duration::from_millis(DEFAULT_REOPEN_BACKOFF_MAX_MS),
            failure_window: DEFAULT_FAILURE_WINDOW,
            failure_ratio: DEFAULT_FAILURE_RATIO,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.threshold < 1 {
            return Err(PipelineError::InvalidConfig(
                "threshold must be a positive integer".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(PipelineError::InvalidConfig(
                "confidence must be in [0, 1]".to_string(),
            ));
        }
        if self.target_fps == 0 {
            return Err(PipelineError::InvalidConfig(
                "target_fps must be at least 1".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidConfig(
                "resolution must be non-zero".to_string(),
            ));
        }
        if self.debounce_window == 0 {
            return Err(PipelineError::InvalidConfig(
                "debounce_window must be at least 1".to_string(),
            ));
        }
        if self.failure_window == 0 {
            return Err(PipelineError::InvalidConfig(
                "failure_window must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_ratio) || self.failure_ratio == 0.0 {
            return Err(PipelineError::InvalidConfig(
                "failure_ratio must be in (0, 1]".to_string(),
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(PipelineError::InvalidConfig(
                "jpeg_quality must be in 1..=100".to_string(),
            ));
        }
        Ok(())
    }

    /// Capture interval implied by the target frame rate.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(1000 / self.target_fps.max(1) as u64)
    }
}

/// Copy-on-read config cell.
///
/// `get` clones an `Arc`, so readers see either the whole old config or the
/// whole new one; `swap` installs a new immutable snapshot.
pub struct ConfigCell {
    current: Mutex<Arc<PipelineConfig>>,
}

impl ConfigCell {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            current: Mutex::new(Arc::new(config)),
        }
    }

    pub fn get(&self) -> Arc<PipelineConfig> {
        self.current.lock().expect("config lock poisoned").clone()
    }

    pub fn swap(&self, config: PipelineConfig) {
        *self.current.lock().expect("config lock poisoned") = Arc::new(config);
    }
}

// ----------------------------------------------------------------------------
// Daemon configuration (file + env)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct CrowddConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    alerting: Option<AlertingConfigFile>,
    stream: Option<StreamConfigFile>,
    supervisor: Option<SupervisorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    stall_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence: Option<f32>,
    model_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertingConfigFile {
    threshold: Option<u32>,
    debounce_window: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct SupervisorConfigFile {
    reopen_backoff_base_ms: Option<u64>,
    reopen_backoff_max_ms: Option<u64>,
    failure_window: Option<usize>,
    failure_ratio: Option<f32>,
}

/// Daemon configuration: camera source + pipeline parameters.
#[derive(Clone, Debug)]
pub struct CrowddConfig {
    pub camera_source: String,
    /// ONNX model path; `None` selects the stub backend.
    pub model_path: Option<String>,
    pub pipeline: PipelineConfig,
}

impl CrowddConfig {
    /// Load from the file named by `CROWD_CONFIG` (if set), apply env
    /// overrides, and validate.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("CROWD_CONFIG").ok().as_deref() {
            Some(path) => read_config_file(path)?,
            None => CrowddConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.pipeline
            .validate()
            .map_err(|e| anyhow!("invalid configuration: {e}"))?;
        Ok(cfg)
    }

    fn from_file(file: CrowddConfigFile) -> Self {
        let defaults = PipelineConfig::default();
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let alerting = file.alerting.unwrap_or_default();
        let stream = file.stream.unwrap_or_default();
        let supervisor = file.supervisor.unwrap_or_default();

        let pipeline = PipelineConfig {
            threshold: alerting.threshold.unwrap_or(defaults.threshold),
            confidence: detection.confidence.unwrap_or(defaults.confidence),
            target_fps: camera.target_fps.unwrap_or(defaults.target_fps),
            width: camera.width.unwrap_or(defaults.width),
            height: camera.height.unwrap_or(defaults.height),
            debounce_window: alerting.debounce_window.unwrap_or(defaults.debounce_window),
            stall_timeout: camera
                .stall_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stall_timeout),
            reopen_backoff_base: supervisor
                .reopen_backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reopen_backoff_base),
            reopen_backoff_max: supervisor
                .reopen_backoff_max_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reopen_backoff_max),
            failure_window: supervisor.failure_window.unwrap_or(defaults.failure_window),
            failure_ratio: supervisor.failure_ratio.unwrap_or(defaults.failure_ratio),
            jpeg_quality: stream.jpeg_quality.unwrap_or(defaults.jpeg_quality),
        };

        Self {
            camera_source: camera.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            model_path: detection.model_path,
            pipeline,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("CAMERA_SOURCE") {
            if !source.trim().is_empty() {
                self.camera_source = source;
            }
        }
        if let Ok(width) = std::env::var("CAMERA_WIDTH") {
            self.pipeline.width = parse_env("CAMERA_WIDTH", &width)?;
        }
        if let Ok(height) = std::env::var("CAMERA_HEIGHT") {
            self.pipeline.height = parse_env("CAMERA_HEIGHT", &height)?;
        }
        if let Ok(fps) = std::env::var("CAMERA_FPS") {
            self.pipeline.target_fps = parse_env("CAMERA_FPS", &fps)?;
        }
        if let Ok(threshold) = std::env::var("CROWD_THRESHOLD") {
            self.pipeline.threshold = parse_env("CROWD_THRESHOLD", &threshold)?;
        }
        if let Ok(confidence) = std::env::var("DETECTION_CONFIDENCE") {
            self.pipeline.confidence = parse_env("DETECTION_CONFIDENCE", &confidence)?;
        }
        if let Ok(path) = std::env::var("DETECTION_MODEL") {
            if !path.trim().is_empty() {
                self.model_path = Some(path);
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("{} has invalid value '{}'", key, raw))
}

fn read_config_file(path: &str) -> Result<CrowddConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path, e))?;
    let cfg =
        serde_json::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path, e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let cfg = PipelineConfig {
            threshold: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        for confidence in [-0.1, 1.1] {
            let cfg = PipelineConfig {
                confidence,
                ..PipelineConfig::default()
            };
            assert!(cfg.validate().is_err(), "confidence {confidence}");
        }
    }

    #[test]
    fn config_cell_swaps_whole_snapshots() {
        let cell = ConfigCell::new(PipelineConfig::default());
        let before = cell.get();

        let mut next = PipelineConfig::default();
        next.threshold = 3;
        next.confidence = 0.9;
        cell.swap(next);

        let after = cell.get();
        // The old snapshot is unchanged; the new one is fully visible.
        assert_eq!(before.threshold, DEFAULT_THRESHOLD);
        assert_eq!(after.threshold, 3);
        assert_eq!(after.confidence, 0.9);
    }

    #[test]
    fn frame_budget_follows_fps() {
        let cfg = PipelineConfig {
            target_fps: 20,
            ..PipelineConfig::default()
        };
        assert_eq!(cfg.frame_budget(), Duration::from_millis(50));
    }
}
