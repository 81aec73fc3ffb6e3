//! Detection result types.

use std::time::SystemTime;

use serde::Serialize;

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ObjectClass {
    Person,
    Unknown,
}

/// A single bounding box, normalized to [0,1] frame coordinates.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    /// Model confidence in [0,1].
    pub confidence: f32,
    pub class: ObjectClass,
}

/// Ordered detections produced for exactly one frame.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    /// Capture sequence number of the source frame.
    pub frame_seq: u64,
    /// Capture time of the source frame.
    pub captured_at: SystemTime,
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn person_count(&self) -> u32 {
        self.detections
            .iter()
            .filter(|d| d.class == ObjectClass::Person)
            .count() as u32
    }
}
