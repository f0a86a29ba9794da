//! JSON session configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use camcal_core::{BoardError, BoardGeometry, PatternType, Real};

use crate::capabilities::{FrameError, FrameSink, NullSink, PngDirSink};
use crate::engine::SolveOptions;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Board(#[from] BoardError),
}

fn default_target_frames() -> usize {
    10
}

fn default_output_path() -> PathBuf {
    PathBuf::from("camera_params.json")
}

fn default_true() -> bool {
    true
}

/// Configuration of one calibration session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Pattern printed on the board.
    pub pattern: PatternType,
    /// Inner-point rows of the board.
    pub board_rows: u32,
    /// Inner-point columns of the board.
    pub board_cols: u32,
    /// Physical square side or circle spacing, in user units.
    pub square_size: Real,
    /// Observation count after which a solve is triggered.
    #[serde(default = "default_target_frames")]
    pub target_frames: usize,
    /// Flip frames vertically before detection.
    #[serde(default)]
    pub flip_vertical: bool,
    /// Fixed fx/fy ratio; enables the fix-aspect-ratio solver flag.
    #[serde(default)]
    pub aspect_ratio: Option<Real>,
    #[serde(default)]
    pub use_intrinsic_guess: bool,
    #[serde(default)]
    pub fix_principal_point: bool,
    #[serde(default)]
    pub zero_tangential_distortion: bool,
    /// Persist per-pose extrinsics and per-view errors in the artifact.
    #[serde(default = "default_true")]
    pub write_extrinsics: bool,
    /// Persist raw detected image points in the artifact.
    #[serde(default)]
    pub write_points: bool,
    /// Artifact destination.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    /// When set, annotated frames are written into this directory.
    #[serde(default)]
    pub annotate_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Build the validated board geometry.
    pub fn board_geometry(&self) -> Result<BoardGeometry, BoardError> {
        BoardGeometry::new(self.board_rows, self.board_cols, self.square_size)
    }

    /// Build the annotated-frame sink selected by the config: a PNG writer
    /// when `annotate_dir` is set, otherwise a no-op sink.
    pub fn build_sink(&self) -> Result<Box<dyn FrameSink>, FrameError> {
        match &self.annotate_dir {
            Some(dir) => Ok(Box::new(PngDirSink::new(dir.clone())?)),
            None => Ok(Box::new(NullSink)),
        }
    }

    /// Solver flags derived from the config.
    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            use_intrinsic_guess: self.use_intrinsic_guess,
            fix_aspect_ratio: self.aspect_ratio.is_some(),
            fix_principal_point: self.fix_principal_point,
            zero_tangential_distortion: self.zero_tangential_distortion,
            aspect_ratio: self.aspect_ratio,
        }
    }
}
