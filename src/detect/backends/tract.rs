#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};

/// MobileNet-SSD input resolution.
const SSD_INPUT: u32 = 300;
/// Caffe-style preprocessing: (pixel - mean) * scale.
const SSD_MEAN: f32 = 127.5;
const SSD_SCALE: f32 = 0.007_843;
/// VOC class index for "person" in the MobileNet-SSD label map.
const PERSON_CLASS_ID: usize = 15;

/// Tract-based ONNX backend running MobileNet-SSD person detection.
///
/// Loads a local model file; no network I/O after construction. Output rows
/// are `(image_id, class_id, confidence, x1, y1, x2, y2)` with normalized
/// corner coordinates.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, SSD_INPUT as usize, SSD_INPUT as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model })
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != SSD_INPUT || height != SSD_INPUT {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                SSD_INPUT,
                SSD_INPUT
            ));
        }
        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                (pixels[idx] as f32 - SSD_MEAN) * SSD_SCALE
            },
        );
        Ok(input.into_tensor())
    }

    fn decode_output(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = view.iter().copied().collect();
        if flat.len() % 7 != 0 {
            return Err(anyhow!(
                "unexpected SSD output length {} (not a multiple of 7)",
                flat.len()
            ));
        }

        let mut detections = Vec::new();
        for row in flat.chunks_exact(7) {
            let class_id = row[1] as usize;
            let confidence = row[2];
            if !confidence.is_finite() || confidence <= 0.0 {
                continue;
            }
            // Scrub non-finite coordinates and clamp to the frame; malformed
            // rows otherwise produce out-of-range boxes downstream.
            let x1 = sanitize(row[3]);
            let y1 = sanitize(row[4]);
            let x2 = sanitize(row[5]);
            let y2 = sanitize(row[6]);
            let class = if class_id == PERSON_CLASS_ID {
                ObjectClass::Person
            } else {
                ObjectClass::Unknown
            };
            detections.push(Detection {
                x: x1,
                y: y1,
                w: (x2 - x1).max(0.0),
                h: (y2 - y1).max(0.0),
                confidence: confidence.clamp(0.0, 1.0),
                class,
            });
        }
        Ok(detections)
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> (u32, u32) {
        (SSD_INPUT, SSD_INPUT)
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_output(outputs)
    }
}
