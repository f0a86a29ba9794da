//! Calibration solve delegation and reprojection diagnostics.
//!
//! The engine replicates the board's reference points once per observation,
//! hands the stacked views to the external solver, then reprojects every
//! view with the solved parameters to derive per-view and aggregate
//! reprojection errors. A structural sanity check rejects non-finite or
//! absurdly large solutions before they reach persistence.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use camcal_core::{
    project_points, CameraMatrix, DistortionCoeffs, Observation, Pose, Pt2, Pt3, Real,
};

use crate::capabilities::CalibrationSolver;

/// Calibration flag bits, kept compatible with the bitmask persisted by the
/// original OpenCV-based tool.
const FLAG_USE_INTRINSIC_GUESS: u32 = 1;
const FLAG_FIX_ASPECT_RATIO: u32 = 2;
const FLAG_FIX_PRINCIPAL_POINT: u32 = 4;
const FLAG_ZERO_TANGENT_DIST: u32 = 8;

/// Solve failures. Both variants are recoverable: the session reverts to
/// `Detecting` and keeps capturing instead of terminating.
#[derive(thiserror::Error, Debug)]
pub enum SolveError {
    /// The delegate solver could not produce a solution (insufficient
    /// observations, degenerate geometry, no convergence).
    #[error("calibration solve failed: {0}")]
    SolveFailed(String),
    /// The solver returned values that fail the structural sanity check.
    #[error("calibration produced a degenerate solution")]
    DegenerateSolution,
}

/// Solver flags, each independently togglable and passed through verbatim.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SolveOptions {
    #[serde(default)]
    pub use_intrinsic_guess: bool,
    #[serde(default)]
    pub fix_aspect_ratio: bool,
    #[serde(default)]
    pub fix_principal_point: bool,
    #[serde(default)]
    pub zero_tangential_distortion: bool,
    /// Fixed fx/fy ratio, honoured when `fix_aspect_ratio` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<Real>,
}

impl SolveOptions {
    /// OpenCV-compatible flag bitmask.
    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.use_intrinsic_guess {
            bits |= FLAG_USE_INTRINSIC_GUESS;
        }
        if self.fix_aspect_ratio {
            bits |= FLAG_FIX_ASPECT_RATIO;
        }
        if self.fix_principal_point {
            bits |= FLAG_FIX_PRINCIPAL_POINT;
        }
        if self.zero_tangential_distortion {
            bits |= FLAG_ZERO_TANGENT_DIST;
        }
        bits
    }

    /// Human-readable `+flag` summary, empty when no flag is set.
    pub fn summary(&self) -> String {
        let mut s = String::new();
        if self.use_intrinsic_guess {
            s.push_str("+use_intrinsic_guess");
        }
        if self.fix_aspect_ratio {
            s.push_str("+fix_aspectRatio");
        }
        if self.fix_principal_point {
            s.push_str("+fix_principal_point");
        }
        if self.zero_tangential_distortion {
            s.push_str("+zero_tangent_dist");
        }
        s
    }

    /// Intrinsic-matrix seed handed to solvers that want a starting guess.
    pub fn seed_camera_matrix(&self) -> CameraMatrix {
        match (self.fix_aspect_ratio, self.aspect_ratio) {
            (true, Some(aspect)) => CameraMatrix::with_aspect_ratio(aspect),
            _ => CameraMatrix::identity(),
        }
    }
}

/// Result of one successful calibration solve, with diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub camera_matrix: CameraMatrix,
    pub distortion: DistortionCoeffs,
    /// One pose per observation, in observation order.
    pub poses: Vec<Pose>,
    /// Per-view reprojection error, `sqrt(|d|² / n)` per view.
    pub per_view_errors: Vec<Real>,
    /// Aggregate RMS reprojection error, weighted by per-view point count.
    pub avg_reprojection_error: Real,
    /// RMS as reported by the solver itself, before our own reprojection.
    pub solver_rms: Real,
}

/// Per-view and aggregate RMS reprojection errors.
///
/// The aggregate is `sqrt(Σ|d_i|² / Σn_i)` across all views — weighted by
/// point count, which equals the mean of per-view errors only when every
/// view observes the same number of points.
pub fn reprojection_errors(
    object_points: &[Vec<Pt3>],
    image_points: &[Vec<Pt2>],
    poses: &[Pose],
    camera_matrix: &CameraMatrix,
    distortion: &DistortionCoeffs,
) -> (Vec<Real>, Real) {
    let mut per_view = Vec::with_capacity(object_points.len());
    let mut total_sq = 0.0;
    let mut total_points = 0usize;

    for ((object, image), pose) in object_points.iter().zip(image_points).zip(poses) {
        let projected = project_points(object, pose, camera_matrix, distortion);
        let norm_sq: Real = projected
            .iter()
            .zip(image)
            .map(|(p, q)| (p - q).norm_squared())
            .sum();
        per_view.push((norm_sq / object.len() as Real).sqrt());
        total_sq += norm_sq;
        total_points += object.len();
    }

    let rms = if total_points > 0 {
        (total_sq / total_points as Real).sqrt()
    } else {
        0.0
    };
    (per_view, rms)
}

/// Run a calibration solve over the accumulated observations and evaluate
/// the reprojection error of the solution.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "info", skip_all, fields(views = observations.len()))
)]
pub fn solve_and_evaluate(
    reference: &[Pt3],
    observations: &[Observation],
    image_size: (u32, u32),
    options: &SolveOptions,
    solver: &mut dyn CalibrationSolver,
) -> Result<CalibrationResult, SolveError> {
    // The board geometry is identical for all frames: replicate the
    // reference layout once per observation.
    let object_points: Vec<Vec<Pt3>> = observations.iter().map(|_| reference.to_vec()).collect();
    let image_points: Vec<Vec<Pt2>> = observations.iter().map(|o| o.points.clone()).collect();

    let output = solver.solve(&object_points, &image_points, image_size, options)?;

    if !output.camera_matrix.is_sane() || !output.distortion.is_sane() {
        warn!("solver returned non-finite or out-of-range parameters");
        return Err(SolveError::DegenerateSolution);
    }
    if output.poses.len() != observations.len() {
        return Err(SolveError::SolveFailed(format!(
            "solver returned {} poses for {} views",
            output.poses.len(),
            observations.len()
        )));
    }

    let (per_view_errors, avg_reprojection_error) = reprojection_errors(
        &object_points,
        &image_points,
        &output.poses,
        &output.camera_matrix,
        &output.distortion,
    );

    info!(
        "solve over {} views: rms {:.4} (solver-reported {:.4})",
        observations.len(),
        avg_reprojection_error,
        output.rms
    );

    Ok(CalibrationResult {
        camera_matrix: output.camera_matrix,
        distortion: output.distortion,
        poses: output.poses,
        per_view_errors,
        avg_reprojection_error,
        solver_rms: output.rms,
    })
}
