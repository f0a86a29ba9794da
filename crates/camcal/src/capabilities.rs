//! Collaborator traits consumed by the calibration session.
//!
//! The numerically heavy primitives — pattern localization, sub-pixel
//! refinement, the calibration solve — live behind these traits so the
//! session controller stays portable and testable. Frame I/O follows the
//! same pattern: an ordered [`FrameSource`] and an optional annotated-image
//! [`FrameSink`].

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageReader};
use log::debug;

use camcal_core::{BoardGeometry, CameraMatrix, DistortionCoeffs, PatternType, Pt2, Pt3, Real};

use crate::engine::{SolveError, SolveOptions};

/// Errors from frame acquisition and annotated-frame output.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// One frame pulled from a source, in acquisition order.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Zero-based acquisition index.
    pub index: usize,
    /// Originating path, when the source is file-backed.
    pub path: Option<PathBuf>,
    /// Decoded image; may be multi-channel, the session normalizes it.
    pub image: DynamicImage,
}

/// Ordered sequence of frames.
pub trait FrameSource {
    /// Pull the next frame, or `Ok(None)` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError>;
}

/// File-backed frame source reading images from a directory in sorted order.
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageDirSource {
    /// List a directory and serve its files in lexicographic order.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, FrameError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();
        Ok(Self::from_paths(paths))
    }

    /// Serve an explicit, already-ordered path list.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let Some(path) = self.paths.get(self.next).cloned() else {
            return Ok(None);
        };
        let index = self.next;
        self.next += 1;
        debug!("loading frame {} from {}", index, path.display());
        let image = ImageReader::open(&path)?.decode()?;
        Ok(Some(Frame {
            index,
            path: Some(path),
            image,
        }))
    }
}

/// Localizes the calibration pattern in one frame.
pub trait PatternDetector {
    /// Returns the detected 2D points in reference-point order, or `None`
    /// when the pattern is not found in this frame.
    fn detect(
        &mut self,
        image: &GrayImage,
        pattern: PatternType,
        geometry: &BoardGeometry,
    ) -> Option<Vec<Pt2>>;
}

/// Iteration cap and convergence tolerance for sub-pixel refinement.
#[derive(Clone, Copy, Debug)]
pub struct TermCriteria {
    pub max_iterations: u32,
    /// Stop once no point moved more than this many pixels in an iteration.
    pub epsilon: Real,
}

impl Default for TermCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            epsilon: 0.1,
        }
    }
}

/// Improves detected point localization to sub-pixel accuracy.
pub trait CornerRefiner {
    fn refine(
        &mut self,
        image: &GrayImage,
        points: &mut [Pt2],
        half_window: u32,
        criteria: TermCriteria,
    );
}

/// Iterative intensity-centroid refiner.
///
/// Each iteration moves a point to the gradient-magnitude centroid of its
/// window and stops at the criteria's iteration cap or once movement drops
/// below the tolerance. A deliberately simple conformant refiner; swap in a
/// stronger one for demanding optics.
#[derive(Clone, Copy, Debug, Default)]
pub struct CentroidRefiner;

impl CentroidRefiner {
    fn gradient_magnitude(image: &GrayImage, x: u32, y: u32) -> Real {
        let w = image.width();
        let h = image.height();
        if x == 0 || y == 0 || x + 1 >= w || y + 1 >= h {
            return 0.0;
        }
        let px = |x: u32, y: u32| Real::from(image.get_pixel(x, y)[0]);
        let gx = px(x + 1, y) - px(x - 1, y);
        let gy = px(x, y + 1) - px(x, y - 1);
        (gx * gx + gy * gy).sqrt()
    }

    fn refine_one(image: &GrayImage, point: &mut Pt2, half_window: u32, criteria: TermCriteria) {
        for _ in 0..criteria.max_iterations {
            let cx = point.x.round() as i64;
            let cy = point.y.round() as i64;

            let mut weight_sum = 0.0;
            let mut x_sum = 0.0;
            let mut y_sum = 0.0;
            let r = i64::from(half_window);
            for dy in -r..=r {
                for dx in -r..=r {
                    let x = cx + dx;
                    let y = cy + dy;
                    if x < 0 || y < 0 || x >= i64::from(image.width()) || y >= i64::from(image.height())
                    {
                        continue;
                    }
                    let w = Self::gradient_magnitude(image, x as u32, y as u32);
                    weight_sum += w;
                    x_sum += w * x as Real;
                    y_sum += w * y as Real;
                }
            }
            if weight_sum <= 0.0 {
                return;
            }

            let refined = Pt2::new(x_sum / weight_sum, y_sum / weight_sum);
            let moved = (refined - *point).norm();
            *point = refined;
            if moved < criteria.epsilon {
                return;
            }
        }
    }
}

impl CornerRefiner for CentroidRefiner {
    fn refine(
        &mut self,
        image: &GrayImage,
        points: &mut [Pt2],
        half_window: u32,
        criteria: TermCriteria,
    ) {
        for point in points {
            Self::refine_one(image, point, half_window, criteria);
        }
    }
}

/// Raw output of a calibration solve, in solver-native form.
#[derive(Clone, Debug)]
pub struct SolverOutput {
    pub camera_matrix: CameraMatrix,
    pub distortion: DistortionCoeffs,
    /// One pose per input view, same order.
    pub poses: Vec<camcal_core::Pose>,
    /// RMS reprojection error as reported by the solver itself.
    pub rms: Real,
}

/// Nonlinear least-squares camera calibration capability.
///
/// `object_points[i]` and `image_points[i]` describe view `i`; the slices
/// have equal length and per-view point counts match pairwise.
pub trait CalibrationSolver {
    fn solve(
        &mut self,
        object_points: &[Vec<Pt3>],
        image_points: &[Vec<Pt2>],
        image_size: (u32, u32),
        options: &SolveOptions,
    ) -> Result<SolverOutput, SolveError>;
}

/// Consumes annotated frames (corner overlay, progress counter).
///
/// A side effect with no influence on session control flow.
pub trait FrameSink {
    fn write_annotated(&mut self, frame_index: usize, image: &GrayImage) -> Result<(), FrameError>;
}

/// Sink that drops every frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn write_annotated(&mut self, _frame_index: usize, _image: &GrayImage) -> Result<(), FrameError> {
        Ok(())
    }
}

/// Sink that writes annotated frames as `<index>.png` into a directory.
pub struct PngDirSink {
    dir: PathBuf,
}

impl PngDirSink {
    /// Create the directory if needed and write frames into it.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, FrameError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl FrameSink for PngDirSink {
    fn write_annotated(&mut self, frame_index: usize, image: &GrayImage) -> Result<(), FrameError> {
        let path = self.dir.join(format!("{frame_index}.png"));
        image.save(&path)?;
        debug!("wrote annotated frame to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bright 3x3 blob centred off the integer grid.
    fn blob_image() -> GrayImage {
        let mut img = GrayImage::new(32, 32);
        for (x, y, v) in [(15u32, 15u32, 200u8), (16, 15, 255), (15, 16, 255), (16, 16, 200)] {
            img.put_pixel(x, y, image::Luma([v]));
        }
        img
    }

    #[test]
    fn centroid_refiner_stays_within_window() {
        let img = blob_image();
        let mut points = vec![Pt2::new(14.0, 14.0)];
        CentroidRefiner.refine(&img, &mut points, 3, TermCriteria::default());
        let p = points[0];
        assert!((p.x - 15.5).abs() < 2.0, "x drifted: {p:?}");
        assert!((p.y - 15.5).abs() < 2.0, "y drifted: {p:?}");
    }

    #[test]
    fn centroid_refiner_is_noop_on_flat_image() {
        let img = GrayImage::new(16, 16);
        let mut points = vec![Pt2::new(8.2, 7.9)];
        CentroidRefiner.refine(&img, &mut points, 2, TermCriteria::default());
        assert_eq!(points[0], Pt2::new(8.2, 7.9));
    }

    #[test]
    fn dir_source_orders_frames() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.png", "c.png"] {
            GrayImage::new(4, 4).save(dir.path().join(name)).unwrap();
        }
        let mut source = ImageDirSource::from_dir(dir.path()).unwrap();
        assert_eq!(source.len(), 3);

        let mut names = Vec::new();
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            indices.push(frame.index);
            names.push(frame.path.unwrap().file_name().unwrap().to_owned());
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    }
}
