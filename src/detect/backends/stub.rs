use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};

/// Stub backend for development and tests.
///
/// Derives a deterministic synthetic crowd from a hash of the pixels: the
/// same frame always yields the same boxes, and scene changes in the stub
/// sources move the count around. No model file required.
pub struct StubBackend {
    input_size: (u32, u32),
    max_people: u8,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            input_size: (320, 240),
            max_people: 6,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn detect(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        let digest: [u8; 32] = Sha256::digest(pixels).into();
        let count = (digest[0] % (self.max_people + 1)) as usize;

        let mut detections = Vec::with_capacity(count);
        for i in 0..count {
            // Four hash bytes per box; positions clamped so boxes stay in frame.
            let b = &digest[1 + i * 4..1 + i * 4 + 4];
            let w = 0.08 + (b[2] as f32 / 255.0) * 0.12;
            let h = 0.18 + (b[3] as f32 / 255.0) * 0.22;
            let x = (b[0] as f32 / 255.0) * (1.0 - w);
            let y = (b[1] as f32 / 255.0) * (1.0 - h);
            let confidence = 0.55 + (b[0] as f32 / 255.0) * 0.4;
            detections.push(Detection {
                x,
                y,
                w,
                h,
                confidence,
                class: ObjectClass::Person,
            });
        }
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_is_deterministic_per_frame() {
        let mut backend = StubBackend::new();
        let pixels = vec![42u8; 320 * 240 * 3];
        let a = backend.detect(&pixels, 320, 240).unwrap();
        let b = backend.detect(&pixels, 320, 240).unwrap();
        assert_eq!(a.len(), b.len());
        for (da, db) in a.iter().zip(&b) {
            assert_eq!(da.x, db.x);
            assert_eq!(da.confidence, db.confidence);
        }
    }

    #[test]
    fn stub_boxes_stay_normalized() {
        let mut backend = StubBackend::new();
        for seed in 0u8..16 {
            let pixels = vec![seed; 320 * 240 * 3];
            for d in backend.detect(&pixels, 320, 240).unwrap() {
                assert!(d.x >= 0.0 && d.x + d.w <= 1.0 + f32::EPSILON);
                assert!(d.y >= 0.0 && d.y + d.h <= 1.0 + f32::EPSILON);
                assert!((0.0..=1.0).contains(&d.confidence));
                assert_eq!(d.class, ObjectClass::Person);
            }
        }
    }
}
