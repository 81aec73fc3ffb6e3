//! External collaborator interfaces.
//!
//! Durable storage of alert events and failure/backoff telemetry live
//! outside this crate; the pipeline only needs somewhere to hand them off.
//! Sinks must tolerate re-delivery (events are idempotent by timestamp +
//! kind) and must not block for long: delivery happens on the aggregation
//! thread.

use std::time::SystemTime;

use anyhow::Result;
use serde::Serialize;

use crate::occupancy::{AlertEvent, AlertKind};

/// Receives alert-raised / alert-cleared events, in emission order.
pub trait AlertSink: Send {
    fn deliver(&mut self, event: &AlertEvent) -> Result<()>;
}

/// Log-backed alert sink used when no external sink is wired up.
#[derive(Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn deliver(&mut self, event: &AlertEvent) -> Result<()> {
        match event.kind {
            AlertKind::Raised => log::warn!(
                "crowd alert raised: count={} threshold={}",
                event.count,
                event.threshold
            ),
            AlertKind::Cleared => log::info!(
                "crowd alert cleared: count={} threshold={}",
                event.count,
                event.threshold
            ),
        }
        Ok(())
    }
}

/// Operational fault categories reported to the observability collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FaultKind {
    /// Capture stalled or the device went away.
    SourceStall,
    /// A reopen attempt failed; the supervisor is backing off.
    ReopenBackoff,
    /// The source came back after an outage.
    SourceRecovered,
    /// A single inference call failed; the frame was skipped.
    InferenceFailure,
    /// The inference failure ratio was exceeded; the pipeline is stopping.
    FatalEscalation,
}

#[derive(Clone, Debug, Serialize)]
pub struct FaultReport {
    pub kind: FaultKind,
    pub detail: String,
    pub at: SystemTime,
}

impl FaultReport {
    pub fn now(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            at: SystemTime::now(),
        }
    }
}

/// Failure/backoff reporting seam. Transient faults are reported here and
/// never surfaced through the snapshot or frame stream.
pub trait ObservabilitySink: Send {
    fn report(&mut self, fault: &FaultReport);
}

/// Default observability sink: structured lines through the log facade.
#[derive(Default)]
pub struct LogObservability;

impl ObservabilitySink for LogObservability {
    fn report(&mut self, fault: &FaultReport) {
        match fault.kind {
            FaultKind::FatalEscalation => {
                log::error!("pipeline fault {:?}: {}", fault.kind, fault.detail)
            }
            FaultKind::SourceRecovered => {
                log::info!("pipeline fault {:?}: {}", fault.kind, fault.detail)
            }
            _ => log::warn!("pipeline fault {:?}: {}", fault.kind, fault.detail),
        }
    }
}
