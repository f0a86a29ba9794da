//! Camera calibration session controller.
//!
//! This crate drives intrinsic/extrinsic camera calibration from a sequence
//! of images of a known planar pattern. The pixel-level pattern detector,
//! the sub-pixel refiner, and the nonlinear solver are consumed through
//! traits (see [`capabilities`]) so any conformant implementation can be
//! substituted; the crate owns the orchestration around them:
//!
//! - [`session`] — the capture state machine (frame intake, observation
//!   bookkeeping, solve triggering),
//! - [`engine`] — solve delegation and reprojection-error diagnostics,
//! - [`artifact`] — the persisted calibration artifact and its reload path,
//! - [`config`] — JSON session configuration,
//! - [`replay`] — pre-recorded detections for detector-less pipelines,
//! - [`render`] — synthetic calibration-board images.

pub mod annotate;
pub mod artifact;
pub mod capabilities;
pub mod config;
pub mod engine;
pub mod render;
pub mod replay;
pub mod session;

pub use camcal_core as core;

pub use artifact::{load_intrinsics, ArtifactError, CalibrationArtifact};
pub use capabilities::{
    CalibrationSolver, CentroidRefiner, CornerRefiner, Frame, FrameError, FrameSink, FrameSource,
    ImageDirSource, NullSink, PatternDetector, PngDirSink, SolverOutput, TermCriteria,
};
pub use config::{ConfigError, SessionConfig};
pub use engine::{CalibrationResult, SolveError, SolveOptions};
pub use session::{CalibrationSession, CancelFlag, SessionError, SessionState, SessionSummary};
