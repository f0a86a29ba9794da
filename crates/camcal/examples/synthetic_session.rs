//! Run a full calibration session on synthetic frames.
//!
//! A scripted detector serves ground-truth projections of a 5x4 board (with
//! one frame failing detection) and a toy solver hands back the ground
//! truth, so the whole controller pipeline — bookkeeping, solve triggering,
//! diagnostics, artifact persistence — runs without real images.
//!
//! ```sh
//! cargo run --example synthetic_session
//! ```

use camcal::capabilities::{
    CalibrationSolver, CornerRefiner, PatternDetector, SolverOutput, TermCriteria,
};
use camcal::config::SessionConfig;
use camcal::engine::{SolveError, SolveOptions};
use camcal::replay::BlankFrameSource;
use camcal::session::CalibrationSession;
use camcal_core::{
    reference_points, synthetic, BoardGeometry, CameraMatrix, DistortionCoeffs, PatternType, Pose,
    Pt2, Pt3,
};
use image::GrayImage;

struct ScriptedDetector {
    views: Vec<Option<Vec<Pt2>>>,
    cursor: usize,
}

impl PatternDetector for ScriptedDetector {
    fn detect(
        &mut self,
        _image: &GrayImage,
        _pattern: PatternType,
        _geometry: &BoardGeometry,
    ) -> Option<Vec<Pt2>> {
        let view = self.views.get(self.cursor).cloned().flatten();
        self.cursor += 1;
        view
    }
}

struct PassthroughRefiner;

impl CornerRefiner for PassthroughRefiner {
    fn refine(
        &mut self,
        _image: &GrayImage,
        _points: &mut [Pt2],
        _half_window: u32,
        _criteria: TermCriteria,
    ) {
    }
}

struct ToySolver {
    camera_matrix: CameraMatrix,
    distortion: DistortionCoeffs,
    poses: Vec<Pose>,
}

impl CalibrationSolver for ToySolver {
    fn solve(
        &mut self,
        _object_points: &[Vec<Pt3>],
        image_points: &[Vec<Pt2>],
        _image_size: (u32, u32),
        _options: &SolveOptions,
    ) -> Result<SolverOutput, SolveError> {
        if image_points.len() < 3 {
            return Err(SolveError::SolveFailed("too few views".to_string()));
        }
        Ok(SolverOutput {
            camera_matrix: self.camera_matrix,
            distortion: self.distortion,
            poses: self.poses[..image_points.len()].to_vec(),
            rms: 0.0,
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = camcal_core::init_with_level(log::LevelFilter::Info);

    let camera_matrix =
        CameraMatrix::from_rows([[800.0, 0.0, 640.0], [0.0, 780.0, 360.0], [0.0, 0.0, 1.0]]);
    let distortion = DistortionCoeffs([0.02, -0.01, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

    let config: SessionConfig = serde_json::from_str(
        r#"{
            "pattern": "chessboard",
            "board_rows": 5,
            "board_cols": 4,
            "square_size": 0.05,
            "target_frames": 8,
            "output_path": "synthetic_camera_params.json"
        }"#,
    )?;

    let geometry = config.board_geometry()?;
    let board = reference_points(&geometry, config.pattern);
    let poses = synthetic::poses_yaw_y_z(6, -0.15, 0.06, 0.6, 0.05);

    // frame 3 fails detection, the rest serve exact projections
    let views: Vec<Option<Vec<Pt2>>> = synthetic::project_views(&board, &poses, &camera_matrix, &distortion)
        .into_iter()
        .enumerate()
        .map(|(i, view)| (i != 3).then_some(view))
        .collect();

    let surviving: Vec<Pose> = poses
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 3)
        .map(|(_, p)| *p)
        .collect();

    let mut session = CalibrationSession::new(&config)?;
    let mut sink = config.build_sink()?;
    let summary = session.run(
        &mut BlankFrameSource::new(6, 1280, 720),
        &mut ScriptedDetector { views, cursor: 0 },
        &mut PassthroughRefiner,
        &mut ToySolver {
            camera_matrix,
            distortion,
            poses: surviving,
        },
        sink.as_mut(),
    )?;

    println!(
        "state: {:?}, {} observations from {} frames",
        summary.state, summary.observations, summary.frames_attempted
    );
    if let Some(rms) = summary.avg_reprojection_error {
        println!("avg reprojection error: {rms:.6}");
    }
    if let Some(path) = summary.artifact_path {
        println!("artifact: {}", path.display());
    }
    Ok(())
}
