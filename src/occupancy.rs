//! Occupancy aggregation and alert hysteresis.
//!
//! Raw per-frame person counts are noisy: people flicker at frame edges and
//! partial occlusion drops detections for a frame or two. Alerting on raw
//! counts oscillates at the threshold boundary. The tracker applies two
//! stages of smoothing:
//!
//! 1. A sliding debounce window: the accepted count only changes when every
//!    raw count in the window agrees; a mixed window retains the previous
//!    accepted count.
//! 2. A clear-side dwell: an active alert clears only after the accepted
//!    count has stayed below the threshold for a full window of ticks.
//!
//! The state machine is an explicit value (`AlertState` + window buffer)
//! owned here, so the transition logic is unit-testable in isolation.

use std::collections::VecDeque;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Default debounce window length (consecutive results).
pub const DEFAULT_DEBOUNCE_WINDOW: usize = 3;

/// The live occupancy value polled by external collaborators.
///
/// Exactly one snapshot exists per pipeline instance; it is overwritten
/// atomically on each accepted detection result.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    /// Debounced people count.
    pub count: u32,
    pub timestamp: SystemTime,
    pub alert_active: bool,
}

impl OccupancySnapshot {
    /// Snapshot for a pipeline that has not yet accepted any result.
    pub fn initial() -> Self {
        Self {
            count: 0,
            timestamp: SystemTime::UNIX_EPOCH,
            alert_active: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    Raised,
    Cleared,
}

/// Immutable alert transition event.
///
/// Consumed at-most-once per sink; sinks must tolerate re-delivery
/// (idempotent by timestamp + kind).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub count: u32,
    pub threshold: u32,
    pub timestamp: SystemTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertState {
    Normal,
    AlertActive,
}

/// Debounced occupancy tracker and alert state machine.
pub struct OccupancyTracker {
    window: VecDeque<u32>,
    window_len: usize,
    accepted: u32,
    state: AlertState,
    /// Consecutive ticks with accepted count below threshold while alerting.
    below_streak: usize,
}

impl OccupancyTracker {
    pub fn new(window_len: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_len.max(1)),
            window_len: window_len.max(1),
            accepted: 0,
            state: AlertState::Normal,
            below_streak: 0,
        }
    }

    pub fn accepted_count(&self) -> u32 {
        self.accepted
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    /// Feed one raw per-frame count, in capture order.
    ///
    /// The threshold is passed per tick so a reconfigure is re-evaluated on
    /// the next result and may transition immediately. Returns the updated
    /// snapshot and at most one alert transition event.
    pub fn observe(
        &mut self,
        raw_count: u32,
        threshold: u32,
        at: SystemTime,
    ) -> (OccupancySnapshot, Option<AlertEvent>) {
        if self.window.len() == self.window_len {
            self.window.pop_front();
        }
        self.window.push_back(raw_count);

        // A still-filling window counts as uniform when all entries agree;
        // a single outlier frame never moves the accepted count.
        if self.window.iter().all(|&c| c == raw_count) {
            self.accepted = raw_count;
        }

        let event = self.step_alert(threshold, at);
        let snapshot = OccupancySnapshot {
            count: self.accepted,
            timestamp: at,
            alert_active: self.state == AlertState::AlertActive,
        };
        (snapshot, event)
    }

    fn step_alert(&mut self, threshold: u32, at: SystemTime) -> Option<AlertEvent> {
        match self.state {
            AlertState::Normal => {
                if self.accepted >= threshold {
                    self.state = AlertState::AlertActive;
                    self.below_streak = 0;
                    return Some(AlertEvent {
                        kind: AlertKind::Raised,
                        count: self.accepted,
                        threshold,
                        timestamp: at,
                    });
                }
                None
            }
            AlertState::AlertActive => {
                if self.accepted < threshold {
                    self.below_streak += 1;
                    if self.below_streak >= self.window_len {
                        self.state = AlertState::Normal;
                        self.below_streak = 0;
                        return Some(AlertEvent {
                            kind: AlertKind::Cleared,
                            count: self.accepted,
                            threshold,
                            timestamp: at,
                        });
                    }
                } else {
                    self.below_streak = 0;
                }
                None
            }
        }
    }
}
