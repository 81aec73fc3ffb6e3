//! Raw frame container.
//!
//! A `Frame` is a timestamped RGB24 pixel buffer with fixed dimensions for a
//! pipeline run. Ownership transfers from the frame source into the pipeline;
//! downstream stages share it behind `Arc<Frame>` and the buffer is released
//! once the last stage drops it.

use std::time::SystemTime;

use anyhow::{anyhow, Result};

/// Bytes per pixel for RGB24 frames.
pub const RGB_CHANNELS: usize = 3;

/// A single captured video frame (RGB24).
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Wall-clock capture time.
    pub captured_at: SystemTime,

    /// Pipeline-wide monotonic capture sequence number, assigned by the
    /// capture loop. Used to keep detection results in capture order.
    pub seq: u64,
}

impl Frame {
    /// Create a frame, validating that the buffer matches the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, captured_at: SystemTime) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at,
            seq: 0,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Consume the frame, returning the pixel buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    /// Resample to the given resolution with nearest-neighbor scaling.
    ///
    /// Deterministic for a given input size; this is the normalization step
    /// applied before inference against a fixed model input resolution.
    pub fn resize_nearest(&self, width: u32, height: u32) -> Result<Frame> {
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot resize frame to zero dimensions"));
        }

        let out_len = rgb_len(width, height)?;
        let mut out = vec![0u8; out_len];
        let src_w = self.width as usize;

        for y in 0..height as usize {
            let src_y = y * self.height as usize / height as usize;
            for x in 0..width as usize {
                let src_x = x * src_w / width as usize;
                let src = (src_y * src_w + src_x) * RGB_CHANNELS;
                let dst = (y * width as usize + x) * RGB_CHANNELS;
                out[dst..dst + RGB_CHANNELS].copy_from_slice(&self.data[src..src + RGB_CHANNELS]);
            }
        }

        Ok(Frame {
            data: out,
            width,
            height,
            captured_at: self.captured_at,
            seq: self.seq,
        })
    }
}

/// RGB24 buffer length for the given dimensions, with overflow checks.
pub fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        let len = rgb_len(width, height).unwrap();
        Frame::new(vec![value; len], width, height, SystemTime::now()).unwrap()
    }

    #[test]
    fn rejects_length_mismatch() {
        let err = Frame::new(vec![0u8; 10], 640, 480, SystemTime::now());
        assert!(err.is_err());
    }

    #[test]
    fn resize_is_deterministic() {
        let mut data = vec![0u8; rgb_len(4, 4).unwrap()];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let frame = Frame::new(data, 4, 4, SystemTime::now()).unwrap();

        let a = frame.resize_nearest(2, 2).unwrap();
        let b = frame.resize_nearest(2, 2).unwrap();
        assert_eq!(a.pixels(), b.pixels());
        assert_eq!(a.width, 2);
        assert_eq!(a.height, 2);
        assert_eq!(a.byte_len(), 12);
    }

    #[test]
    fn resize_preserves_solid_color() {
        let frame = solid(8, 6, 17);
        let resized = frame.resize_nearest(300, 300).unwrap();
        assert!(resized.pixels().iter().all(|&b| b == 17));
    }

    #[test]
    fn same_size_resize_is_identity() {
        let frame = solid(8, 8, 3);
        let same = frame.resize_nearest(8, 8).unwrap();
        assert_eq!(same.pixels(), frame.pixels());
    }
}
