//! Recorded-frame source.
//!
//! Replays a directory of JPEG stills in lexicographic order at the
//! configured resolution, ending the stream cleanly when the recording is
//! exhausted. Decoding happens in-memory; nothing is written back to disk.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};

use crate::error::SourceError;
use crate::frame::Frame;
use crate::ingest::{CaptureSettings, FrameSource};

#[derive(Debug)]
pub struct FileSource {
    dir: PathBuf,
    settings: CaptureSettings,
    stills: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
}

impl FileSource {
    pub fn new(path: &str, settings: CaptureSettings) -> Result<Self> {
        let dir = PathBuf::from(path);
        let stills = scan_stills(&dir)?;
        Ok(Self {
            dir,
            settings,
            stills,
            cursor: 0,
            frame_count: 0,
        })
    }

    fn decode_still(&self, path: &Path) -> Result<Frame> {
        let decoded = image::open(path)
            .with_context(|| format!("decode still {}", path.display()))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        let frame = Frame::new(decoded.into_raw(), width, height, SystemTime::now())?;
        // Recorded stills may not match the pipeline resolution.
        frame.resize_nearest(self.settings.width, self.settings.height)
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        format!("{} ({} stills)", self.dir.display(), self.stills.len())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(path) = self.stills.get(self.cursor).cloned() else {
            return Ok(None);
        };
        let frame = self
            .decode_still(&path)
            .map_err(|e| SourceError::Unavailable(format!("{e:#}")))?;
        self.cursor += 1;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn reopen(&mut self) -> Result<(), SourceError> {
        // Re-scan: the recording may have grown or been replaced.
        self.stills =
            scan_stills(&self.dir).map_err(|e| SourceError::Unavailable(format!("{e:#}")))?;
        self.cursor = self.cursor.min(self.stills.len());
        log::info!(
            "FileSource: reopened {} ({} stills)",
            self.dir.display(),
            self.stills.len()
        );
        Ok(())
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

fn scan_stills(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow!(
            "recorded source '{}' is not a directory",
            dir.display()
        ));
    }
    let mut stills: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read frame directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
        })
        .collect();
    stills.sort();
    if stills.is_empty() {
        return Err(anyhow!(
            "recorded source '{}' contains no JPEG stills",
            dir.display()
        ));
    }
    Ok(stills)
}
