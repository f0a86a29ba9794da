//! Pre-recorded detections.
//!
//! A recorded-detections file holds per-frame found/points records, letting
//! the full session pipeline run without a pixel-level detector: record once
//! with real hardware, replay forever in CI. [`BlankFrameSource`] pairs with
//! it by serving uniform frames of the right size.

use std::fs;
use std::path::Path;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use camcal_core::{BoardGeometry, PatternType, Pt2};

use crate::capabilities::{Frame, FrameError, FrameSource, PatternDetector};

#[derive(thiserror::Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One recorded frame: found flag plus the detected points, if any.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub found: bool,
    #[serde(default)]
    pub points: Vec<Pt2>,
}

/// Per-frame detection records, in frame order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordedDetections {
    pub frames: Vec<RecordedFrame>,
}

impl RecordedDetections {
    /// Load a JSON detections file from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this detections file to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReplayError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of frames recorded as found.
    pub fn found_count(&self) -> usize {
        self.frames.iter().filter(|f| f.found).count()
    }
}

/// A [`PatternDetector`] that replays a recorded-detections file.
///
/// Records are consumed in frame order; frames beyond the recording report
/// the pattern as not found.
pub struct ReplayDetector {
    detections: RecordedDetections,
    cursor: usize,
}

impl ReplayDetector {
    pub fn new(detections: RecordedDetections) -> Self {
        Self {
            detections,
            cursor: 0,
        }
    }
}

impl PatternDetector for ReplayDetector {
    fn detect(
        &mut self,
        _image: &GrayImage,
        _pattern: PatternType,
        _geometry: &BoardGeometry,
    ) -> Option<Vec<Pt2>> {
        let record = self.detections.frames.get(self.cursor)?;
        self.cursor += 1;
        record.found.then(|| record.points.clone())
    }
}

/// Serves `count` uniform grayscale frames of a fixed size.
pub struct BlankFrameSource {
    count: usize,
    width: u32,
    height: u32,
    next: usize,
}

impl BlankFrameSource {
    pub fn new(count: usize, width: u32, height: u32) -> Self {
        Self {
            count,
            width,
            height,
            next: 0,
        }
    }
}

impl FrameSource for BlankFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.next >= self.count {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        Ok(Some(Frame {
            index,
            path: None,
            image: DynamicImage::ImageLuma8(GrayImage::new(self.width, self.height)),
        }))
    }
}
