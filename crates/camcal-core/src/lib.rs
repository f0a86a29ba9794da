//! Core types for camera calibration sessions.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete pattern detector, solver, or image type.

mod board;
mod camera;
mod logger;
mod math;
mod observation;

/// Synthetic planar calibration data for tests and examples.
pub mod synthetic;

pub use board::{reference_points, BoardError, BoardGeometry, PatternType};
pub use camera::{project_point, project_points, CameraMatrix, DistortionCoeffs, Pose};
pub use math::{Mat3, Pt2, Pt3, Real, Vec2, Vec3};
pub use observation::{AccumulatorError, FrameOutcome, Observation, ObservationAccumulator};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
