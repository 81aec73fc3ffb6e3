//! Inference scheduling.
//!
//! Detection latency is assumed to exceed the capture interval, so capture
//! and inference are decoupled through a single pending-frame slot:
//! - at most one `Detector::infer` call is outstanding at any time;
//! - while inference is in flight, newly captured frames overwrite the
//!   pending slot (latest-frame-wins), bounding memory to O(1) frames;
//! - outcomes leave the worker in the order their frames were captured, so
//!   downstream aggregation never sees results out of order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::ConfigCell;
use crate::detect::{DetectionResult, Detector};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::slot::LatestSlot;

/// Worker poll interval while the pending slot is empty.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// One completed scheduling step, successful or not.
pub enum InferenceOutcome {
    Completed {
        frame: Arc<Frame>,
        result: DetectionResult,
    },
    Failed {
        frame_seq: u64,
        error: PipelineError,
    },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerStats {
    pub frames_submitted: u64,
    /// Frames overwritten in the pending slot before inference saw them.
    pub frames_dropped: u64,
    pub inferences_ok: u64,
    pub inferences_failed: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    ok: AtomicU64,
    failed: AtomicU64,
}

/// Owns the pending-frame slot and the single inference worker thread.
pub struct InferenceScheduler {
    pending: Arc<LatestSlot<Frame>>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<Counters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InferenceScheduler {
    /// Spawn the inference worker. Outcomes are sent in capture order; the
    /// worker exits when the pending slot closes or the outcome receiver is
    /// dropped.
    pub fn spawn(
        mut detector: Detector,
        config: Arc<ConfigCell>,
        outcomes: Sender<InferenceOutcome>,
    ) -> Self {
        let pending: Arc<LatestSlot<Frame>> = Arc::new(LatestSlot::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let worker_pending = pending.clone();
        let worker_shutdown = shutdown.clone();
        let worker_counters = counters.clone();
        let worker = std::thread::spawn(move || {
            log::debug!("inference worker started ({})", detector.backend_name());
            loop {
                if worker_shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let Some(frame) = worker_pending.take_wait(IDLE_WAIT) else {
                    if worker_pending.is_closed() {
                        break;
                    }
                    continue;
                };

                let cfg = config.get();
                let outcome = match detector.infer(&frame, cfg.confidence) {
                    Ok(result) => {
                        worker_counters.ok.fetch_add(1, Ordering::Relaxed);
                        InferenceOutcome::Completed { frame, result }
                    }
                    Err(error) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        InferenceOutcome::Failed {
                            frame_seq: frame.seq,
                            error,
                        }
                    }
                };
                if outcomes.send(outcome).is_err() {
                    break;
                }
            }
            log::debug!("inference worker stopped");
        });

        Self {
            pending,
            shutdown,
            counters,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Submit a captured frame. Never blocks; an unconsumed pending frame is
    /// replaced and counted as dropped.
    pub fn submit(&self, frame: Frame) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if self.pending.publish(frame) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            frames_submitted: self.counters.submitted.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            inferences_ok: self.counters.ok.load(Ordering::Relaxed),
            inferences_failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Cooperative stop: close the slot, wake the worker, join it.
    /// Idempotent; later calls are no-ops.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.pending.close();
        let handle = self.worker.lock().expect("scheduler lock poisoned").take();
        if let Some(worker) = handle {
            let _ = worker.join();
        }
    }
}

impl Drop for InferenceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
