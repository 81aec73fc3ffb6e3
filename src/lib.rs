//! Crowdwatch
//!
//! This crate implements a real-time occupancy monitoring pipeline for a
//! single camera feed: frames are captured at a bounded rate, run through a
//! person detector, debounced into a stable occupancy count, and surfaced as
//! threshold alerts, a poll-anytime snapshot, and an annotated JPEG stream.
//!
//! # Design properties
//!
//! 1. **Bounded memory**: at most one frame waits for inference; a backlog
//!    collapses to the newest frame instead of queueing.
//! 2. **Ordered results**: detection results reach the tracker in capture
//!    order, so the debounce window and alert dwell are deterministic.
//! 3. **Debounced alerting**: a crowd alert fires once per threshold
//!    crossing and clears only after a full dwell below the threshold.
//! 4. **Degrade, don't crash**: a lost camera is retried with exponential
//!    backoff forever; only a persistently failing detector stops the run.
//! 5. **Passive viewers**: stream viewers and snapshot readers never apply
//!    backpressure or mutate pipeline state.
//!
//! # Module structure
//!
//! - `ingest`: frame source adapters (stub, recorded stills, RTSP)
//! - `detect`: detector backends and the confidence/class filter
//! - `scheduler`: single-in-flight inference scheduling
//! - `occupancy`: debounce window and alert state machine
//! - `stream`: overlay drawing, JPEG encoding, viewer cursors
//! - `supervisor`: thread lifecycle, reopen backoff, fatal escalation

pub mod alert;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod occupancy;
pub mod scheduler;
pub mod slot;
pub mod stream;
pub mod supervisor;

pub use alert::{AlertSink, FaultKind, FaultReport, LogAlertSink, LogObservability, ObservabilitySink};
pub use config::{ConfigCell, CrowddConfig, PipelineConfig};
pub use detect::{Detection, DetectionResult, Detector, DetectorBackend, ObjectClass, StubBackend};
pub use error::{PipelineError, SourceError};
pub use frame::Frame;
pub use ingest::{open_source, CaptureSettings, FrameSource};
pub use occupancy::{AlertEvent, AlertKind, OccupancySnapshot, OccupancyTracker};
pub use scheduler::{InferenceOutcome, InferenceScheduler, SchedulerStats};
pub use stream::{EncodedFrame, FrameStream, StreamEncoder};
pub use supervisor::{PipelineHandle, PipelineSupervisor};

#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
