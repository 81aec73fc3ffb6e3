//! People detection.
//!
//! `DetectorBackend` implementations are swappable adapters selected at
//! pipeline construction. The `Detector` wrapper owns the pipeline-facing
//! contract: normalize the frame to the backend's fixed input resolution,
//! run detection, and filter the output down to person boxes above the
//! configured confidence.

mod backend;
mod backends;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{Detection, DetectionResult, ObjectClass};

use crate::error::PipelineError;
use crate::frame::Frame;

/// Pipeline-facing detector: backend + normalization + confidence filter.
///
/// Pure with respect to pipeline state: no memory of previous frames.
pub struct Detector {
    backend: Box<dyn DetectorBackend>,
}

impl Detector {
    pub fn new(backend: Box<dyn DetectorBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<(), PipelineError> {
        self.backend
            .warm_up()
            .map_err(|e| PipelineError::InferenceFailure(format!("{e:#}")))
    }

    /// Run inference on one frame.
    ///
    /// The frame is resampled to the backend input resolution with
    /// deterministic nearest-neighbor scaling. Detections below
    /// `confidence` and non-person classes are dropped before the result is
    /// returned.
    pub fn infer(&mut self, frame: &Frame, confidence: f32) -> Result<DetectionResult, PipelineError> {
        let (want_w, want_h) = self.backend.input_size();
        let normalized = frame
            .resize_nearest(want_w, want_h)
            .map_err(|e| PipelineError::InferenceFailure(format!("{e:#}")))?;

        let raw = self
            .backend
            .detect(normalized.pixels(), want_w, want_h)
            .map_err(|e| PipelineError::InferenceFailure(format!("{e:#}")))?;

        let detections = raw
            .into_iter()
            .filter(|d| d.class == ObjectClass::Person)
            .filter(|d| d.confidence.is_finite() && d.confidence >= confidence)
            .collect();

        Ok(DetectionResult {
            frame_seq: frame.seq,
            captured_at: frame.captured_at,
            detections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result as AnyResult;
    use std::time::SystemTime;

    /// Backend double returning a fixed set of boxes.
    struct FixedBackend {
        boxes: Vec<Detection>,
    }

    impl DetectorBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn input_size(&self) -> (u32, u32) {
            (8, 8)
        }

        fn detect(&mut self, _pixels: &[u8], _w: u32, _h: u32) -> AnyResult<Vec<Detection>> {
            Ok(self.boxes.clone())
        }
    }

    fn test_frame() -> Frame {
        Frame::new(vec![0u8; 16 * 16 * 3], 16, 16, SystemTime::now()).unwrap()
    }

    fn person(confidence: f32) -> Detection {
        Detection {
            x: 0.1,
            y: 0.1,
            w: 0.2,
            h: 0.4,
            confidence,
            class: ObjectClass::Person,
        }
    }

    #[test]
    fn filters_below_confidence_and_non_person() {
        let mut boxes = vec![person(0.9), person(0.3)];
        boxes.push(Detection {
            class: ObjectClass::Unknown,
            ..person(0.99)
        });
        let mut detector = Detector::new(Box::new(FixedBackend { boxes }));

        let result = detector.infer(&test_frame(), 0.5).unwrap();
        assert_eq!(result.person_count(), 1);
        assert_eq!(result.detections[0].confidence, 0.9);
    }

    #[test]
    fn result_carries_frame_identity() {
        let mut detector = Detector::new(Box::new(FixedBackend { boxes: vec![] }));
        let mut frame = test_frame();
        frame.seq = 41;
        let result = detector.infer(&frame, 0.5).unwrap();
        assert_eq!(result.frame_seq, 41);
        assert_eq!(result.captured_at, frame.captured_at);
    }

    #[test]
    fn backend_error_maps_to_inference_failure() {
        struct FailingBackend;
        impl DetectorBackend for FailingBackend {
            fn name(&self) -> &'static str {
                "failing"
            }
            fn input_size(&self) -> (u32, u32) {
                (8, 8)
            }
            fn detect(&mut self, _: &[u8], _: u32, _: u32) -> AnyResult<Vec<Detection>> {
                anyhow::bail!("model exploded")
            }
        }

        let mut detector = Detector::new(Box::new(FailingBackend));
        let err = detector.infer(&test_frame(), 0.5).unwrap_err();
        assert!(matches!(err, PipelineError::InferenceFailure(_)));
    }
}
