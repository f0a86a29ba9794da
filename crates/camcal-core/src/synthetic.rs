//! Synthetic planar calibration data.
//!
//! Deterministic board poses and ground-truth projections for tests and
//! examples: generate a reference layout with
//! [`reference_points`](crate::reference_points), pick poses with
//! [`poses_yaw_y_z`], and project with [`project_view`].

use crate::camera::{project_points, CameraMatrix, DistortionCoeffs, Pose};
use crate::math::{Pt2, Pt3, Real, Vec3};

/// Generate `n_views` poses with a yaw ramp around +Y and a Z translation
/// ramp, keeping a planar board in front of the camera while varying the
/// viewpoint.
pub fn poses_yaw_y_z(
    n_views: usize,
    yaw_start_rad: Real,
    yaw_step_rad: Real,
    z_start: Real,
    z_step: Real,
) -> Vec<Pose> {
    (0..n_views)
        .map(|view_idx| {
            let yaw = yaw_start_rad + yaw_step_rad * view_idx as Real;
            Pose::new(
                Vec3::new(0.0, yaw, 0.0),
                Vec3::new(0.0, 0.0, z_start + z_step * view_idx as Real),
            )
        })
        .collect()
}

/// Project a board into the camera for one pose.
pub fn project_view(
    board_points: &[Pt3],
    pose: &Pose,
    camera_matrix: &CameraMatrix,
    distortion: &DistortionCoeffs,
) -> Vec<Pt2> {
    project_points(board_points, pose, camera_matrix, distortion)
}

/// Project a board for every pose in `poses`.
pub fn project_views(
    board_points: &[Pt3],
    poses: &[Pose],
    camera_matrix: &CameraMatrix,
    distortion: &DistortionCoeffs,
) -> Vec<Vec<Pt2>> {
    poses
        .iter()
        .map(|pose| project_view(board_points, pose, camera_matrix, distortion))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{reference_points, BoardGeometry, PatternType};
    use approx::assert_relative_eq;

    #[test]
    fn poses_ramp_deterministically() {
        let poses = poses_yaw_y_z(3, 0.1, 0.05, 0.6, 0.1);
        assert_eq!(poses.len(), 3);
        assert_relative_eq!(poses[2].rvec.y, 0.2, epsilon = 1e-12);
        assert_relative_eq!(poses[2].tvec.z, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn projected_views_match_board_size() {
        let geometry = BoardGeometry::new(5, 4, 0.05).unwrap();
        let board = reference_points(&geometry, PatternType::Chessboard);
        let k = CameraMatrix::from_rows([[800.0, 0.0, 640.0], [0.0, 780.0, 360.0], [0.0, 0.0, 1.0]]);
        let views = project_views(
            &board,
            &poses_yaw_y_z(3, 0.0, 0.1, 0.6, 0.1),
            &k,
            &DistortionCoeffs::zeros(),
        );
        assert_eq!(views.len(), 3);
        assert!(views.iter().all(|v| v.len() == board.len()));
        assert!(views
            .iter()
            .flatten()
            .all(|p| p.x.is_finite() && p.y.is_finite()));
    }
}
