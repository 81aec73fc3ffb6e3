use anyhow::Result;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// Backends run a pretrained model over one frame at a time and have no
/// memory of previous frames. Each backend declares a fixed input
/// resolution; the `Detector` wrapper normalizes frames to it before
/// calling `detect`. Implementations must treat the pixel slice as
/// read-only and ephemeral.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Fixed model input resolution (width, height).
    fn input_size(&self) -> (u32, u32);

    /// Run detection on an RGB24 frame already scaled to `input_size`.
    ///
    /// Returns every candidate box with its class; confidence filtering and
    /// class restriction happen in the `Detector` wrapper.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook (model load, first-run graph optimization).
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
