//! Pinhole camera model with rational Brown-Conrady distortion.
//!
//! Camera pipeline: `pixel = K ∘ distortion ∘ projection(board point)`.
//! Poses are stored the way calibration solvers report them, as an
//! axis-angle rotation vector plus a translation vector.

use nalgebra::Rotation3;
use serde::{Deserialize, Serialize};

use crate::math::{Mat3, Pt2, Pt3, Real, Vec3};

/// Values beyond this magnitude mark a solution as structurally broken.
const MAX_SANE_VALUE: Real = 1e8;

/// 3×3 camera intrinsic matrix.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraMatrix(pub Mat3);

impl CameraMatrix {
    /// Identity seed used when no intrinsic guess is available.
    pub fn identity() -> Self {
        Self(Mat3::identity())
    }

    /// Identity seed with `fx` preset to the fixed aspect ratio.
    ///
    /// Solvers that honour the fix-aspect-ratio flag read the `fx/fy` ratio
    /// from the seed matrix.
    pub fn with_aspect_ratio(aspect_ratio: Real) -> Self {
        let mut m = Mat3::identity();
        m[(0, 0)] = aspect_ratio;
        Self(m)
    }

    pub fn fx(&self) -> Real {
        self.0[(0, 0)]
    }

    pub fn fy(&self) -> Real {
        self.0[(1, 1)]
    }

    pub fn cx(&self) -> Real {
        self.0[(0, 2)]
    }

    pub fn cy(&self) -> Real {
        self.0[(1, 2)]
    }

    /// Row-major nested-array form, the shape used by persisted artifacts.
    pub fn to_rows(&self) -> [[Real; 3]; 3] {
        let m = &self.0;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    pub fn from_rows(rows: [[Real; 3]; 3]) -> Self {
        Self(Mat3::from_fn(|r, c| rows[r][c]))
    }

    /// All entries finite and not absurdly large.
    ///
    /// A structural sanity check, not a numeric-accuracy check.
    pub fn is_sane(&self) -> bool {
        self.0
            .iter()
            .all(|v| v.is_finite() && v.abs() < MAX_SANE_VALUE)
    }
}

/// Distortion coefficients `[k1, k2, p1, p2, k3, k4, k5, k6]`.
///
/// Radial terms follow the rational model (`k4..k6` in the denominator),
/// `p1`/`p2` are tangential. The ordering matches the 8×1 coefficient
/// vector persisted in calibration artifacts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DistortionCoeffs(pub [Real; 8]);

impl DistortionCoeffs {
    pub fn zeros() -> Self {
        Self([0.0; 8])
    }

    /// Apply distortion to normalized image coordinates.
    pub fn distort(&self, x: Real, y: Real) -> (Real, Real) {
        let [k1, k2, p1, p2, k3, k4, k5, k6] = self.0;

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);

        let xy = x * y;
        let x_tan = 2.0 * p1 * xy + p2 * (r2 + 2.0 * x * x);
        let y_tan = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * xy;

        (x * radial + x_tan, y * radial + y_tan)
    }

    /// All coefficients finite and not absurdly large.
    pub fn is_sane(&self) -> bool {
        self.0
            .iter()
            .all(|v| v.is_finite() && v.abs() < MAX_SANE_VALUE)
    }
}

/// Rigid board-to-camera transform in solver-native form.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Axis-angle rotation vector (Rodrigues form).
    pub rvec: Vec3,
    /// Translation vector.
    pub tvec: Vec3,
}

impl Pose {
    pub fn new(rvec: Vec3, tvec: Vec3) -> Self {
        Self { rvec, tvec }
    }

    /// Rotation-matrix form of the axis-angle vector.
    pub fn rotation_matrix(&self) -> Mat3 {
        Rotation3::from_scaled_axis(self.rvec).into_inner()
    }

    /// Transform a board-frame point into the camera frame.
    pub fn transform(&self, p: &Pt3) -> Pt3 {
        let rotated = Rotation3::from_scaled_axis(self.rvec) * *p;
        Pt3::from(rotated.coords + self.tvec)
    }
}

/// Project a board-frame point to pixel coordinates.
pub fn project_point(
    point: &Pt3,
    pose: &Pose,
    camera_matrix: &CameraMatrix,
    distortion: &DistortionCoeffs,
) -> Pt2 {
    let pc = pose.transform(point);
    let (xd, yd) = distortion.distort(pc.x / pc.z, pc.y / pc.z);
    let m = &camera_matrix.0;
    Pt2::new(
        m[(0, 0)] * xd + m[(0, 1)] * yd + m[(0, 2)],
        m[(1, 1)] * yd + m[(1, 2)],
    )
}

/// Project a whole reference-point set with one pose.
pub fn project_points(
    points: &[Pt3],
    pose: &Pose,
    camera_matrix: &CameraMatrix,
    distortion: &DistortionCoeffs,
) -> Vec<Pt2> {
    points
        .iter()
        .map(|p| project_point(p, pose, camera_matrix, distortion))
        .collect()
}
