//! Pipeline lifecycle and fault policy.
//!
//! The supervisor owns the pipeline's degradation policy so the stages stay
//! policy-free: the capture loop paces the source and reopens it with
//! exponential backoff on failure; the aggregation loop feeds detection
//! results through the occupancy tracker, fans out alerts, publishes the
//! snapshot and the annotated stream, and escalates to a fatal stop when the
//! inference failure ratio over a sliding window is exceeded.
//!
//! Thread layout (all plain OS threads, joined on stop):
//!
//! ```text
//! capture --> pending slot --> inference worker --> outcomes --> aggregation
//!    |                          (scheduler)          (mpsc)          |
//!    +- reopen w/ backoff                      snapshot slot <-------+
//!                                              stream slot   <-------+
//!                                              alert sinks   <-------+
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::{AlertSink, FaultKind, FaultReport, ObservabilitySink};
use crate::config::{ConfigCell, PipelineConfig};
use crate::detect::Detector;
use crate::error::{PipelineError, SourceError};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::occupancy::{AlertEvent, OccupancySnapshot, OccupancyTracker};
use crate::scheduler::{InferenceOutcome, InferenceScheduler, SchedulerStats};
use crate::slot::LatestSlot;
use crate::stream::{FrameStream, StreamEncoder};

/// Poll granularity for interruptible sleeps (pacing, backoff).
const SLEEP_SLICE: Duration = Duration::from_millis(50);

type SharedObservability = Arc<Mutex<Box<dyn ObservabilitySink>>>;

/// Builds and starts a pipeline instance.
pub struct PipelineSupervisor;

impl PipelineSupervisor {
    /// Validate the config, warm the detector, and spawn the capture and
    /// aggregation threads. Returns a handle for the external collaborators.
    pub fn start(
        source: Box<dyn FrameSource>,
        mut detector: Detector,
        config: PipelineConfig,
        alert_sink: Box<dyn AlertSink>,
        observability: Box<dyn ObservabilitySink>,
    ) -> Result<PipelineHandle, PipelineError> {
        config.validate()?;
        detector.warm_up()?;

        let config = Arc::new(ConfigCell::new(config));
        let shutdown = Arc::new(AtomicBool::new(false));
        let snapshot: Arc<LatestSlot<OccupancySnapshot>> = Arc::new(LatestSlot::new());
        let encoder = Arc::new(StreamEncoder::new(config.get().jpeg_quality));
        let observability: SharedObservability = Arc::new(Mutex::new(observability));
        let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let subscribers: Arc<Mutex<Vec<Sender<AlertEvent>>>> = Arc::new(Mutex::new(Vec::new()));

        let (outcomes_tx, outcomes_rx) = mpsc::channel();
        let scheduler = Arc::new(InferenceScheduler::spawn(
            detector,
            config.clone(),
            outcomes_tx,
        ));

        let capture = {
            let scheduler = scheduler.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            let observability = observability.clone();
            std::thread::spawn(move || {
                capture_loop(source, scheduler, config, shutdown, observability);
            })
        };

        let aggregation = {
            let config = config.clone();
            let shutdown = shutdown.clone();
            let snapshot = snapshot.clone();
            let encoder = encoder.clone();
            let observability = observability.clone();
            let fatal = fatal.clone();
            let subscribers = subscribers.clone();
            std::thread::spawn(move || {
                aggregation_loop(
                    outcomes_rx,
                    alert_sink,
                    config,
                    shutdown,
                    snapshot,
                    encoder,
                    observability,
                    fatal,
                    subscribers,
                );
            })
        };

        Ok(PipelineHandle {
            config,
            shutdown,
            snapshot,
            encoder,
            scheduler,
            fatal,
            subscribers,
            threads: Mutex::new(vec![capture, aggregation]),
        })
    }
}

/// Live pipeline handle held by the daemon and external collaborators.
pub struct PipelineHandle {
    config: Arc<ConfigCell>,
    shutdown: Arc<AtomicBool>,
    snapshot: Arc<LatestSlot<OccupancySnapshot>>,
    encoder: Arc<StreamEncoder>,
    scheduler: Arc<InferenceScheduler>,
    fatal: Arc<Mutex<Option<String>>>,
    subscribers: Arc<Mutex<Vec<Sender<AlertEvent>>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineHandle {
    /// Current occupancy snapshot. Never blocks; before the first accepted
    /// result it reports zero occupancy with the epoch timestamp.
    pub fn snapshot(&self) -> OccupancySnapshot {
        self.snapshot
            .latest()
            .map(|s| *s)
            .unwrap_or_else(OccupancySnapshot::initial)
    }

    /// Subscribe to alert transitions from this point on. Each subscriber
    /// gets every subsequent event, in emission order.
    pub fn subscribe_alerts(&self) -> Receiver<AlertEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(tx);
        rx
    }

    /// A new independent viewer over the annotated JPEG stream.
    pub fn frame_stream(&self) -> FrameStream {
        self.encoder.subscribe()
    }

    /// Install a new validated config atomically. In-flight operations keep
    /// the snapshot they started with; the next tick sees the new one.
    pub fn reconfigure(&self, config: PipelineConfig) -> Result<(), PipelineError> {
        if self.is_stopped() {
            return Err(PipelineError::Stopped);
        }
        config.validate()?;
        self.config.swap(config);
        Ok(())
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// The fatal error that stopped the run loop, if any.
    pub fn fault(&self) -> Option<PipelineError> {
        self.fatal
            .lock()
            .expect("fault lock poisoned")
            .as_ref()
            .map(|detail| PipelineError::PipelineFatal(detail.clone()))
    }

    /// True once the run loop has been asked to stop or has stopped itself
    /// (end of stream, fatal escalation).
    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop the pipeline and join all threads. Idempotent.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.scheduler.stop();
        self.snapshot.close();
        self.encoder.close();
        let threads: Vec<_> = self
            .threads
            .lock()
            .expect("thread list lock poisoned")
            .drain(..)
            .collect();
        for thread in threads {
            let _ = thread.join();
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep in slices so shutdown interrupts promptly. Returns true when the
/// sleep was cut short by shutdown.
fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    scheduler: Arc<InferenceScheduler>,
    config: Arc<ConfigCell>,
    shutdown: Arc<AtomicBool>,
    observability: SharedObservability,
) {
    log::info!("capture started: {}", source.describe());
    let mut seq: u64 = 0;

    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        match source.next_frame() {
            Ok(Some(mut frame)) => {
                seq += 1;
                frame.seq = seq;
                scheduler.submit(frame);
            }
            Ok(None) => {
                log::info!("source ended cleanly after {} frames", seq);
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(SourceError::Unavailable(reason)) => {
                report(
                    &observability,
                    FaultReport::now(FaultKind::SourceStall, reason),
                );
                if !reopen_with_backoff(source.as_mut(), &config, &shutdown, &observability) {
                    break;
                }
                continue;
            }
        }

        // Pace to the target frame rate; capture that runs behind is not
        // compensated, the next frame just starts late.
        let budget = config.get().frame_budget();
        let elapsed = started.elapsed();
        if elapsed < budget {
            sleep_interruptible(budget - elapsed, &shutdown);
        }
    }

    scheduler.stop();
    log::info!("capture stopped");
}

/// Reopen the source until it succeeds or shutdown is requested, doubling
/// the delay from the configured base up to the cap. Never gives up on its
/// own; a dead camera is an operator problem, not a crash.
fn reopen_with_backoff(
    source: &mut dyn FrameSource,
    config: &ConfigCell,
    shutdown: &AtomicBool,
    observability: &SharedObservability,
) -> bool {
    let mut delay = config.get().reopen_backoff_base;
    let mut attempt: u32 = 0;

    loop {
        if sleep_interruptible(delay, shutdown) {
            return false;
        }
        attempt += 1;
        match source.reopen() {
            Ok(()) => {
                report(
                    observability,
                    FaultReport::now(
                        FaultKind::SourceRecovered,
                        format!("source recovered after {} reopen attempts", attempt),
                    ),
                );
                return true;
            }
            Err(SourceError::Unavailable(reason)) => {
                report(
                    observability,
                    FaultReport::now(
                        FaultKind::ReopenBackoff,
                        format!(
                            "reopen attempt {} failed ({}); next in {:?}",
                            attempt, reason, delay
                        ),
                    ),
                );
                let cap = config.get().reopen_backoff_max;
                delay = (delay * 2).min(cap);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn aggregation_loop(
    outcomes: Receiver<InferenceOutcome>,
    mut alert_sink: Box<dyn AlertSink>,
    config: Arc<ConfigCell>,
    shutdown: Arc<AtomicBool>,
    snapshot: Arc<LatestSlot<OccupancySnapshot>>,
    encoder: Arc<StreamEncoder>,
    observability: SharedObservability,
    fatal: Arc<Mutex<Option<String>>>,
    subscribers: Arc<Mutex<Vec<Sender<AlertEvent>>>>,
) {
    let mut tracker = OccupancyTracker::new(config.get().debounce_window);
    // Sliding record of inference attempts, true = failed.
    let mut failures: VecDeque<bool> = VecDeque::new();

    // The channel closes when the scheduler stops; draining it keeps
    // results ordered through shutdown.
    while let Ok(outcome) = outcomes.recv() {
        let cfg = config.get();

        match outcome {
            InferenceOutcome::Completed { frame, result } => {
                record_attempt(&mut failures, cfg.failure_window, false);

                let count = result.person_count();
                let (snap, event) = tracker.observe(count, cfg.threshold, result.captured_at);
                snapshot.publish(snap);

                if let Err(err) = encoder.publish(&frame, &result, &snap) {
                    log::warn!("stream encode failed for frame {}: {:#}", frame.seq, err);
                }
                if let Some(event) = event {
                    deliver_alert(&mut alert_sink, &subscribers, event);
                }
            }
            InferenceOutcome::Failed { frame_seq, error } => {
                record_attempt(&mut failures, cfg.failure_window, true);
                report(
                    &observability,
                    FaultReport::now(
                        FaultKind::InferenceFailure,
                        format!("frame {}: {}", frame_seq, error),
                    ),
                );
            }
        }

        if let Some(ratio) = failure_ratio(&failures, cfg.failure_window) {
            if ratio >= cfg.failure_ratio {
                let detail = format!(
                    "inference failure ratio {:.2} over last {} attempts (limit {:.2})",
                    ratio, cfg.failure_window, cfg.failure_ratio
                );
                report(
                    &observability,
                    FaultReport::now(FaultKind::FatalEscalation, detail.clone()),
                );
                *fatal.lock().expect("fault lock poisoned") = Some(detail);
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }

    snapshot.close();
    encoder.close();
    // Dropping the senders ends every subscriber's event sequence.
    subscribers
        .lock()
        .expect("subscriber lock poisoned")
        .clear();
    log::info!("aggregation stopped");
}

fn record_attempt(failures: &mut VecDeque<bool>, window: usize, failed: bool) {
    while failures.len() >= window.max(1) {
        failures.pop_front();
    }
    failures.push_back(failed);
}

/// Failure ratio once the window is full; `None` while it is still filling,
/// so a cold pipeline is not condemned on its first few frames.
fn failure_ratio(failures: &VecDeque<bool>, window: usize) -> Option<f32> {
    if failures.len() < window.max(1) {
        return None;
    }
    let failed = failures.iter().filter(|&&f| f).count();
    Some(failed as f32 / failures.len() as f32)
}

fn deliver_alert(
    sink: &mut Box<dyn AlertSink>,
    subscribers: &Mutex<Vec<Sender<AlertEvent>>>,
    event: AlertEvent,
) {
    if let Err(err) = sink.deliver(&event) {
        log::warn!("alert sink delivery failed: {:#}", err);
    }
    // Disconnected subscribers are pruned on the way through.
    subscribers
        .lock()
        .expect("subscriber lock poisoned")
        .retain(|tx| tx.send(event).is_ok());
}

fn report(observability: &SharedObservability, fault: FaultReport) {
    observability
        .lock()
        .expect("observability lock poisoned")
        .report(&fault);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::LogAlertSink;
    use crate::detect::{Detection, DetectorBackend, ObjectClass};
    use crate::frame::rgb_len;
    use std::sync::atomic::AtomicUsize;
    use std::time::SystemTime;

    /// Source double producing a fixed number of tiny frames, then ending.
    /// The first frame is delayed so tests can subscribe before any result
    /// flows through the pipeline.
    #[derive(Debug)]
    struct CountedSource {
        remaining: usize,
        produced: u64,
    }

    impl FrameSource for CountedSource {
        fn describe(&self) -> String {
            "test://counted".to_string()
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            if self.produced == 0 {
                std::thread::sleep(Duration::from_millis(100));
            }
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            self.produced += 1;
            let frame = Frame::new(
                vec![0u8; rgb_len(8, 8).unwrap()],
                8,
                8,
                SystemTime::now(),
            )
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
            Ok(Some(frame))
        }

        fn reopen(&mut self) -> Result<(), SourceError> {
            Ok(())
        }

        fn frames_captured(&self) -> u64 {
            self.produced
        }
    }

    /// Source that fails a fixed number of times before recovering.
    #[derive(Debug)]
    struct FlakySource {
        failures_left: Arc<AtomicUsize>,
        remaining: usize,
    }

    impl FrameSource for FlakySource {
        fn describe(&self) -> String {
            "test://flaky".to_string()
        }

        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                return Err(SourceError::Unavailable("simulated outage".to_string()));
            }
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(
                Frame::new(
                    vec![0u8; rgb_len(8, 8).unwrap()],
                    8,
                    8,
                    SystemTime::now(),
                )
                .map_err(|e| SourceError::Unavailable(e.to_string()))?,
            ))
        }

        fn reopen(&mut self) -> Result<(), SourceError> {
            if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 1 {
                Err(SourceError::Unavailable("still down".to_string()))
            } else {
                Ok(())
            }
        }

        fn frames_captured(&self) -> u64 {
            0
        }
    }

    fn fixed_count_backend(count: usize) -> Box<dyn DetectorBackend> {
        struct Fixed(usize);
        impl DetectorBackend for Fixed {
            fn name(&self) -> &'static str {
                "fixed"
            }
            fn input_size(&self) -> (u32, u32) {
                (8, 8)
            }
            fn detect(&mut self, _: &[u8], _: u32, _: u32) -> anyhow::Result<Vec<Detection>> {
                Ok((0..self.0)
                    .map(|i| Detection {
                        x: 0.05 * i as f32,
                        y: 0.1,
                        w: 0.1,
                        h: 0.2,
                        confidence: 0.9,
                        class: ObjectClass::Person,
                    })
                    .collect())
            }
        }
        Box::new(Fixed(count))
    }

    struct FailingBackend;
    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn input_size(&self) -> (u32, u32) {
            (8, 8)
        }
        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> anyhow::Result<Vec<Detection>> {
            anyhow::bail!("persistent model failure")
        }
    }

    /// Observability double recording fault kinds.
    #[derive(Clone, Default)]
    struct RecordingObservability {
        kinds: Arc<Mutex<Vec<FaultKind>>>,
    }

    impl ObservabilitySink for RecordingObservability {
        fn report(&mut self, fault: &FaultReport) {
            self.kinds.lock().unwrap().push(fault.kind);
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            threshold: 3,
            target_fps: 100,
            debounce_window: 2,
            failure_window: 4,
            reopen_backoff_base: Duration::from_millis(10),
            reopen_backoff_max: Duration::from_millis(40),
            ..PipelineConfig::default()
        }
    }

    fn wait_until_stopped(handle: &PipelineHandle) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_stopped() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_stopped(), "pipeline did not stop in time");
    }

    #[test]
    fn end_of_stream_stops_pipeline_cleanly() {
        let handle = PipelineSupervisor::start(
            Box::new(CountedSource {
                remaining: 10,
                produced: 0,
            }),
            Detector::new(fixed_count_backend(1)),
            fast_config(),
            Box::new(LogAlertSink),
            Box::new(RecordingObservability::default()),
        )
        .unwrap();

        wait_until_stopped(&handle);
        handle.stop();
        assert!(handle.fault().is_none());
        assert!(handle.stats().frames_submitted >= 1);
    }

    #[test]
    fn threshold_crossing_raises_alert_and_updates_snapshot() {
        let handle = PipelineSupervisor::start(
            Box::new(CountedSource {
                remaining: 12,
                produced: 0,
            }),
            Detector::new(fixed_count_backend(5)),
            fast_config(),
            Box::new(LogAlertSink),
            Box::new(RecordingObservability::default()),
        )
        .unwrap();
        let alerts = handle.subscribe_alerts();

        let event = alerts
            .recv_timeout(Duration::from_secs(5))
            .expect("alert expected");
        assert_eq!(event.kind, crate::occupancy::AlertKind::Raised);
        assert_eq!(event.count, 5);

        wait_until_stopped(&handle);
        handle.stop();
        let snap = handle.snapshot();
        assert_eq!(snap.count, 5);
        assert!(snap.alert_active);
    }

    #[test]
    fn persistent_inference_failure_escalates_to_fatal() {
        let observability = RecordingObservability::default();
        let handle = PipelineSupervisor::start(
            Box::new(CountedSource {
                remaining: 200,
                produced: 0,
            }),
            Detector::new(Box::new(FailingBackend)),
            fast_config(),
            Box::new(LogAlertSink),
            Box::new(observability.clone()),
        )
        .unwrap();

        wait_until_stopped(&handle);
        handle.stop();

        let fault = handle.fault().expect("fatal expected");
        assert!(matches!(fault, PipelineError::PipelineFatal(_)));
        let kinds = observability.kinds.lock().unwrap();
        assert!(kinds.contains(&FaultKind::InferenceFailure));
        assert!(kinds.contains(&FaultKind::FatalEscalation));
    }

    #[test]
    fn source_outage_recovers_through_backoff() {
        let observability = RecordingObservability::default();
        let handle = PipelineSupervisor::start(
            Box::new(FlakySource {
                failures_left: Arc::new(AtomicUsize::new(3)),
                remaining: 5,
            }),
            Detector::new(fixed_count_backend(0)),
            fast_config(),
            Box::new(LogAlertSink),
            Box::new(observability.clone()),
        )
        .unwrap();

        wait_until_stopped(&handle);
        handle.stop();
        assert!(handle.fault().is_none(), "outage must not be fatal");

        let kinds = observability.kinds.lock().unwrap();
        assert!(kinds.contains(&FaultKind::SourceStall));
        assert!(kinds.contains(&FaultKind::ReopenBackoff));
        assert!(kinds.contains(&FaultKind::SourceRecovered));
    }

    #[test]
    fn reconfigure_rejects_invalid_and_applies_valid() {
        let handle = PipelineSupervisor::start(
            Box::new(CountedSource {
                remaining: 1000,
                produced: 0,
            }),
            Detector::new(fixed_count_backend(0)),
            fast_config(),
            Box::new(LogAlertSink),
            Box::new(RecordingObservability::default()),
        )
        .unwrap();

        let bad = PipelineConfig {
            threshold: 0,
            ..fast_config()
        };
        assert!(matches!(
            handle.reconfigure(bad),
            Err(PipelineError::InvalidConfig(_))
        ));

        let good = PipelineConfig {
            threshold: 1,
            ..fast_config()
        };
        handle.reconfigure(good).unwrap();
        handle.stop();
        assert!(matches!(
            handle.reconfigure(fast_config()),
            Err(PipelineError::Stopped)
        ));
    }

    #[test]
    fn stop_is_idempotent() {
        let handle = PipelineSupervisor::start(
            Box::new(CountedSource {
                remaining: 1000,
                produced: 0,
            }),
            Detector::new(fixed_count_backend(0)),
            fast_config(),
            Box::new(LogAlertSink),
            Box::new(RecordingObservability::default()),
        )
        .unwrap();
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
    }
}
