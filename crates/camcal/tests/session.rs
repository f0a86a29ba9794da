//! End-to-end session tests with synthetic frames and mock collaborators.

use std::collections::HashSet;
use std::path::PathBuf;

use image::{DynamicImage, GrayImage, RgbImage};

use camcal::capabilities::{
    CalibrationSolver, CornerRefiner, Frame, FrameError, FrameSource, NullSink, PatternDetector,
    SolverOutput, TermCriteria,
};
use camcal::config::SessionConfig;
use camcal::engine::{SolveError, SolveOptions};
use camcal::replay::BlankFrameSource;
use camcal::session::{CalibrationSession, SessionState};
use camcal_core::{
    reference_points, synthetic, BoardGeometry, CameraMatrix, DistortionCoeffs, PatternType, Pose,
    Pt2, Pt3,
};

const IMAGE_SIZE: (u32, u32) = (1280, 720);

fn ground_truth_camera() -> (CameraMatrix, DistortionCoeffs) {
    let k = CameraMatrix::from_rows([[800.0, 0.0, 640.0], [0.0, 780.0, 360.0], [0.0, 0.0, 1.0]]);
    let d = DistortionCoeffs([0.02, -0.01, 0.0005, -0.0005, 0.0, 0.0, 0.0, 0.0]);
    (k, d)
}

fn board() -> BoardGeometry {
    BoardGeometry::new(5, 4, 0.05).unwrap()
}

fn config(target_frames: usize, output_path: PathBuf) -> SessionConfig {
    SessionConfig {
        pattern: PatternType::Chessboard,
        board_rows: board().rows,
        board_cols: board().cols,
        square_size: board().square_size,
        target_frames,
        flip_vertical: false,
        aspect_ratio: None,
        use_intrinsic_guess: false,
        fix_principal_point: false,
        zero_tangential_distortion: false,
        write_extrinsics: true,
        write_points: false,
        output_path,
        annotate_dir: None,
    }
}

/// Detector that serves pre-projected ground-truth views, failing on a
/// scripted set of frames.
struct SyntheticDetector {
    views: Vec<Vec<Pt2>>,
    fail_frames: HashSet<usize>,
    cursor: usize,
}

impl SyntheticDetector {
    fn new(n_frames: usize, fail_frames: &[usize]) -> (Self, Vec<Pose>) {
        let (k, d) = ground_truth_camera();
        let reference = reference_points(&board(), PatternType::Chessboard);
        let poses = synthetic::poses_yaw_y_z(n_frames, -0.2, 0.06, 0.6, 0.05);
        let views = synthetic::project_views(&reference, &poses, &k, &d);
        (
            Self {
                views,
                fail_frames: fail_frames.iter().copied().collect(),
                cursor: 0,
            },
            poses,
        )
    }
}

impl PatternDetector for SyntheticDetector {
    fn detect(
        &mut self,
        _image: &GrayImage,
        _pattern: PatternType,
        _geometry: &BoardGeometry,
    ) -> Option<Vec<Pt2>> {
        let index = self.cursor;
        self.cursor += 1;
        if self.fail_frames.contains(&index) {
            return None;
        }
        self.views.get(index).cloned()
    }
}

/// Refiner that leaves points untouched; synthetic views are already exact.
struct IdentityRefiner;

impl CornerRefiner for IdentityRefiner {
    fn refine(
        &mut self,
        _image: &GrayImage,
        _points: &mut [Pt2],
        _half_window: u32,
        _criteria: TermCriteria,
    ) {
    }
}

/// Solver that hands back the ground truth for however many views it gets,
/// refusing degenerate problems with fewer than three views.
struct GroundTruthSolver {
    poses: Vec<Pose>,
    calls: usize,
}

impl GroundTruthSolver {
    /// `poses` must align with the views the solver will receive, i.e. the
    /// ground-truth poses of the frames whose detection succeeds.
    fn new(poses: Vec<Pose>) -> Self {
        Self { poses, calls: 0 }
    }
}

impl CalibrationSolver for GroundTruthSolver {
    fn solve(
        &mut self,
        object_points: &[Vec<Pt3>],
        image_points: &[Vec<Pt2>],
        _image_size: (u32, u32),
        _options: &SolveOptions,
    ) -> Result<SolverOutput, SolveError> {
        self.calls += 1;
        assert_eq!(object_points.len(), image_points.len());
        if image_points.len() < 3 {
            return Err(SolveError::SolveFailed(format!(
                "need at least 3 views, got {}",
                image_points.len()
            )));
        }
        let (camera_matrix, distortion) = ground_truth_camera();
        Ok(SolverOutput {
            camera_matrix,
            distortion,
            poses: self.poses[..image_points.len()].to_vec(),
            rms: 0.0,
        })
    }
}

fn surviving_poses(poses: &[Pose], fail_frames: &[usize]) -> Vec<Pose> {
    poses
        .iter()
        .enumerate()
        .filter(|(i, _)| !fail_frames.contains(i))
        .map(|(_, p)| *p)
        .collect()
}

#[test]
fn end_to_end_with_scripted_detection_failures() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("camera_params.json");

    let fail_frames = [2usize, 5, 8];
    let (mut detector, poses) = SyntheticDetector::new(10, &fail_frames);
    let mut solver = GroundTruthSolver::new(surviving_poses(&poses, &fail_frames));
    let mut source = BlankFrameSource::new(10, IMAGE_SIZE.0, IMAGE_SIZE.1);

    // target above the reachable count: the solve happens at end of stream
    let mut session = CalibrationSession::new(&config(10, output.clone())).unwrap();
    let summary = session
        .run(
            &mut source,
            &mut detector,
            &mut IdentityRefiner,
            &mut solver,
            &mut NullSink,
        )
        .unwrap();

    assert_eq!(summary.frames_attempted, 10);
    assert_eq!(summary.observations, 7);
    assert_eq!(summary.state, SessionState::Calibrated);
    assert!(!summary.cancelled);

    let rms = summary.avg_reprojection_error.unwrap();
    assert!(rms < 0.5, "aggregate rms too high: {rms}");

    assert_eq!(
        session.found_flags(),
        vec![true, true, false, true, true, false, true, true, false, true]
    );
    assert_eq!(session.extrinsics_table().len(), 7);

    // the artifact mirrors the bookkeeping
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(
        doc["found_cheese_board"],
        serde_json::json!([1, 1, 0, 1, 1, 0, 1, 1, 0, 1])
    );
    assert_eq!(doc["nframes"], serde_json::json!(7));
    assert_eq!(doc["image_width"], serde_json::json!(IMAGE_SIZE.0));
    assert!(doc["avg_reprojection_error"].as_f64().unwrap() < 0.5);
}

#[test]
fn solve_failure_regresses_to_detecting() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("camera_params.json");

    // two frames only: every solve sees fewer than 3 views and fails
    let (mut detector, poses) = SyntheticDetector::new(2, &[]);
    let mut solver = GroundTruthSolver::new(poses);
    let mut source = BlankFrameSource::new(2, IMAGE_SIZE.0, IMAGE_SIZE.1);

    let mut session = CalibrationSession::new(&config(1, output.clone())).unwrap();
    let summary = session
        .run(
            &mut source,
            &mut detector,
            &mut IdentityRefiner,
            &mut solver,
            &mut NullSink,
        )
        .unwrap();

    // the threshold crossing (2 > 1) and the finalize pass both failed
    assert!(solver.calls >= 2);
    assert_eq!(summary.state, SessionState::Detecting);
    assert!(summary.avg_reprojection_error.is_none());
    assert!(session.result().is_none());
    assert!(!output.exists(), "failed solves must not write artifacts");
}

#[test]
fn capture_resumes_after_failed_solve() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("camera_params.json");

    // target 1: a solve fires after observation 2 (2 > 1) and fails, then
    // accumulation continues until 3 views satisfy the next solve
    let (mut detector, poses) = SyntheticDetector::new(4, &[]);
    let mut solver = GroundTruthSolver::new(poses);
    let mut source = BlankFrameSource::new(4, IMAGE_SIZE.0, IMAGE_SIZE.1);

    let mut session = CalibrationSession::new(&config(1, output.clone())).unwrap();
    let summary = session
        .run(
            &mut source,
            &mut detector,
            &mut IdentityRefiner,
            &mut solver,
            &mut NullSink,
        )
        .unwrap();

    // frame 3 arrives after calibration succeeded, so it no longer counts
    assert_eq!(summary.observations, 3);
    assert_eq!(summary.state, SessionState::Calibrated);
    assert_eq!(session.found_flags(), vec![true, true, true, false]);
    assert!(output.exists());
}

#[test]
fn threshold_crossing_transitions_to_calibrated() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("camera_params.json");

    let (mut detector, poses) = SyntheticDetector::new(6, &[]);
    let mut solver = GroundTruthSolver::new(poses);
    let mut source = BlankFrameSource::new(6, IMAGE_SIZE.0, IMAGE_SIZE.1);

    let mut session = CalibrationSession::new(&config(3, output.clone())).unwrap();
    let summary = session
        .run(
            &mut source,
            &mut detector,
            &mut IdentityRefiner,
            &mut solver,
            &mut NullSink,
        )
        .unwrap();

    // solve at observation 4 (4 > 3), solve again at end of stream; frames
    // seen after the first success no longer accumulate
    assert_eq!(solver.calls, 2);
    assert_eq!(summary.state, SessionState::Calibrated);
    assert_eq!(summary.observations, 4);
}

#[test]
fn session_without_detections_produces_no_result() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("camera_params.json");

    let (mut detector, _poses) = SyntheticDetector::new(3, &[0, 1, 2]);
    let mut solver = GroundTruthSolver::new(Vec::new());
    let mut source = BlankFrameSource::new(3, IMAGE_SIZE.0, IMAGE_SIZE.1);

    let mut session = CalibrationSession::new(&config(10, output.clone())).unwrap();
    let summary = session
        .run(
            &mut source,
            &mut detector,
            &mut IdentityRefiner,
            &mut solver,
            &mut NullSink,
        )
        .unwrap();

    assert_eq!(solver.calls, 0);
    assert_eq!(summary.frames_attempted, 3);
    assert_eq!(summary.observations, 0);
    assert!(summary.avg_reprojection_error.is_none());
    assert_eq!(session.found_flags(), vec![false, false, false]);
}

/// Detector wrapper that raises the session's cancel flag after a fixed
/// number of frames.
struct CancellingDetector {
    inner: SyntheticDetector,
    cancel_after: usize,
    flag: camcal::session::CancelFlag,
}

impl PatternDetector for CancellingDetector {
    fn detect(
        &mut self,
        image: &GrayImage,
        pattern: PatternType,
        geometry: &BoardGeometry,
    ) -> Option<Vec<Pt2>> {
        if self.inner.cursor + 1 >= self.cancel_after {
            self.flag.cancel();
        }
        self.inner.detect(image, pattern, geometry)
    }
}

#[test]
fn cancellation_finalizes_with_partial_solve() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("camera_params.json");

    let (inner, poses) = SyntheticDetector::new(10, &[]);
    let mut solver = GroundTruthSolver::new(poses);
    let mut source = BlankFrameSource::new(10, IMAGE_SIZE.0, IMAGE_SIZE.1);

    let mut session = CalibrationSession::new(&config(100, output.clone())).unwrap();
    let mut detector = CancellingDetector {
        inner,
        cancel_after: 5,
        flag: session.cancel_flag(),
    };
    let summary = session
        .run(
            &mut source,
            &mut detector,
            &mut IdentityRefiner,
            &mut solver,
            &mut NullSink,
        )
        .unwrap();

    assert!(summary.cancelled);
    // cancellation is frame-granular: the in-flight frame completes
    assert_eq!(summary.frames_attempted, 5);
    assert_eq!(summary.observations, 5);
    // the partial progress was still solved and persisted
    assert_eq!(summary.state, SessionState::Calibrated);
    assert!(output.exists());
}

/// Source serving color frames, to exercise grayscale normalization.
struct ColorFrameSource {
    remaining: usize,
    next: usize,
}

impl FrameSource for ColorFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let index = self.next;
        self.next += 1;
        Ok(Some(Frame {
            index,
            path: None,
            image: DynamicImage::ImageRgb8(RgbImage::new(IMAGE_SIZE.0, IMAGE_SIZE.1)),
        }))
    }
}

#[test]
fn multichannel_frames_are_normalized() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("camera_params.json");

    let (mut detector, poses) = SyntheticDetector::new(4, &[]);
    let mut solver = GroundTruthSolver::new(poses);
    let mut source = ColorFrameSource {
        remaining: 4,
        next: 0,
    };

    let mut cfg = config(10, output);
    cfg.flip_vertical = true;
    let mut session = CalibrationSession::new(&cfg).unwrap();
    let summary = session
        .run(
            &mut source,
            &mut detector,
            &mut IdentityRefiner,
            &mut solver,
            &mut NullSink,
        )
        .unwrap();

    assert_eq!(summary.frames_attempted, 4);
    assert_eq!(summary.observations, 4);
    assert_eq!(summary.state, SessionState::Calibrated);
}
