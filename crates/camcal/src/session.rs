//! Capture state machine.
//!
//! A session pulls frames one at a time from a [`FrameSource`], delegates
//! pattern localization and sub-pixel refinement, keeps frame-aligned
//! bookkeeping, and triggers a calibration solve once enough observations
//! have accumulated. Results are persisted as a [`CalibrationArtifact`]
//! after every successful solve.
//!
//! The pipeline is single-threaded and sequential: one frame is fully
//! processed before the next is acquired, and at most one solve is ever in
//! flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::DynamicImage;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use camcal_core::{
    reference_points, AccumulatorError, BoardGeometry, ObservationAccumulator, PatternType, Pt3,
    Real,
};

use crate::annotate;
use crate::artifact::{ArtifactError, CalibrationArtifact};
use crate::capabilities::{
    CalibrationSolver, CornerRefiner, FrameError, FrameSink, FrameSource, PatternDetector,
    TermCriteria,
};
use crate::config::SessionConfig;
use crate::engine::{solve_and_evaluate, CalibrationResult, SolveOptions};

/// Half side of the sub-pixel refinement search window, in pixels.
const REFINE_HALF_WINDOW: u32 = 5;

/// Mode of the capture loop.
///
/// Legal transitions: `Detecting` → `Capturing` → `Calibrated`, plus the
/// regression `Capturing` → `Detecting` when a solve fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Pattern detection runs but observations are not yet accumulated.
    Detecting,
    /// Observations accumulate toward the target frame count.
    Capturing,
    /// A solve has succeeded and its result is available.
    Calibrated,
}

/// Cooperative cancellation flag, observed between frames.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the session loop to stop before the next frame.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Session failures surfaced to the caller.
///
/// Per-frame detection failures never show up here — they are recorded as
/// frame outcomes and the loop continues. Solve failures only regress the
/// session state.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Bookkeeping(#[from] AccumulatorError),
}

/// Final report of a session run.
#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub state: SessionState,
    pub frames_attempted: usize,
    pub observations: usize,
    /// Aggregate RMS reprojection error of the last successful solve.
    pub avg_reprojection_error: Option<Real>,
    /// Artifact location, when at least one solve succeeded and was saved.
    pub artifact_path: Option<PathBuf>,
    pub cancelled: bool,
}

/// The calibration session controller.
///
/// Owns the session state, the observation bookkeeping, and the latest
/// calibration result for the lifetime of the run. Collaborators (detector,
/// refiner, solver, frame sink) are borrowed for the duration of
/// [`CalibrationSession::run`].
pub struct CalibrationSession {
    pattern: PatternType,
    geometry: BoardGeometry,
    reference: Vec<Pt3>,
    target_frames: usize,
    flip_vertical: bool,
    options: SolveOptions,
    write_extrinsics: bool,
    write_points: bool,
    output_path: PathBuf,

    state: SessionState,
    accumulator: ObservationAccumulator,
    image_size: Option<(u32, u32)>,
    result: Option<CalibrationResult>,
    cancel: CancelFlag,
}

impl CalibrationSession {
    /// Build a session from a validated configuration.
    pub fn new(config: &SessionConfig) -> Result<Self, camcal_core::BoardError> {
        let geometry = config.board_geometry()?;
        let reference = reference_points(&geometry, config.pattern);
        let accumulator = ObservationAccumulator::new(reference.len());
        Ok(Self {
            pattern: config.pattern,
            geometry,
            reference,
            target_frames: config.target_frames,
            flip_vertical: config.flip_vertical,
            options: config.solve_options(),
            write_extrinsics: config.write_extrinsics,
            write_points: config.write_points,
            output_path: config.output_path.clone(),
            state: SessionState::Detecting,
            accumulator,
            image_size: None,
            result: None,
            cancel: CancelFlag::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Latest calibration result, if a solve has succeeded.
    pub fn result(&self) -> Option<&CalibrationResult> {
        self.result.as_ref()
    }

    /// Found/not-found flag per attempted frame.
    pub fn found_flags(&self) -> Vec<bool> {
        self.accumulator.found_flags()
    }

    /// Combined extrinsics table, one `[rvec, tvec]` row per solved pose.
    pub fn extrinsics_table(&self) -> Vec<[Real; 6]> {
        self.result
            .as_ref()
            .map(|r| {
                r.poses
                    .iter()
                    .map(|p| {
                        [
                            p.rvec.x, p.rvec.y, p.rvec.z, p.tvec.x, p.tvec.y, p.tvec.z,
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Handle for cancelling the run from another context.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Drive the capture loop until the source is exhausted or cancelled.
    ///
    /// Detection failures are per-frame and non-fatal. Solve failures
    /// regress the state to `Detecting` and capturing resumes. Frame-source
    /// and artifact I/O errors abort the run.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "info", skip_all, fields(pattern = ?self.pattern))
    )]
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn PatternDetector,
        refiner: &mut dyn CornerRefiner,
        solver: &mut dyn CalibrationSolver,
        sink: &mut dyn FrameSink,
    ) -> Result<SessionSummary, SessionError> {
        let mut cancelled = false;

        loop {
            if self.cancel.is_cancelled() {
                info!("cancellation requested, finalizing session");
                cancelled = true;
                break;
            }
            let Some(frame) = source.next_frame()? else {
                break;
            };

            // Accumulation starts immediately in a non-interactive run; a
            // solve failure later regresses to Detecting and this brings the
            // session back into Capturing on the next frame.
            if self.state == SessionState::Detecting {
                self.state = SessionState::Capturing;
            }

            self.process_frame(frame, detector, refiner, sink)?;

            if self.state == SessionState::Capturing
                && self.accumulator.count() > self.target_frames
            {
                self.solve_and_save(solver)?;
            }
        }

        // A session that ends early still attempts one final solve on
        // whatever was accumulated, so no captured observation is wasted.
        if self.accumulator.count() > 0 {
            self.solve_and_save(solver)?;
        }

        let summary = SessionSummary {
            state: self.state,
            frames_attempted: self.accumulator.frames_attempted(),
            observations: self.accumulator.count(),
            avg_reprojection_error: self.result.as_ref().map(|r| r.avg_reprojection_error),
            artifact_path: self.result.as_ref().map(|_| self.output_path.clone()),
            cancelled,
        };
        match summary.avg_reprojection_error {
            Some(err) => info!(
                "session finished: {} observations from {} frames, avg reprojection error {:.4}",
                summary.observations, summary.frames_attempted, err
            ),
            None => warn!(
                "session finished without a calibration ({} observations from {} frames)",
                summary.observations, summary.frames_attempted
            ),
        }
        Ok(summary)
    }

    fn process_frame(
        &mut self,
        frame: crate::capabilities::Frame,
        detector: &mut dyn PatternDetector,
        refiner: &mut dyn CornerRefiner,
        sink: &mut dyn FrameSink,
    ) -> Result<(), SessionError> {
        let index = frame.index;
        let mut gray = match frame.image {
            DynamicImage::ImageLuma8(img) => img,
            other => other.to_luma8(),
        };
        if self.flip_vertical {
            gray = image::imageops::flip_vertical(&gray);
        }
        self.image_size = Some((gray.width(), gray.height()));

        let detected = detector.detect(&gray, self.pattern, &self.geometry);

        let points = detected.map(|mut points| {
            refiner.refine(&gray, &mut points, REFINE_HALF_WINDOW, TermCriteria::default());
            points
        });

        match points {
            Some(points) if self.state == SessionState::Capturing => {
                annotate::draw_corner_markers(&mut gray, &points);
                self.accumulator.record_found(index, points)?;
                info!(
                    "frame {}: pattern found ({}/{})",
                    index,
                    self.accumulator.count(),
                    self.target_frames
                );
            }
            Some(points) => {
                // Found but not capturing: bookkeeping records a miss so the
                // observation list and found flags stay consistent.
                annotate::draw_corner_markers(&mut gray, &points);
                self.accumulator.record_missed(index)?;
                info!("frame {}: pattern found (not capturing)", index);
            }
            None => {
                self.accumulator.record_missed(index)?;
                info!("frame {}: pattern not found", index);
            }
        }

        annotate::draw_progress(&mut gray, self.accumulator.count(), self.target_frames);
        sink.write_annotated(index, &gray)?;
        Ok(())
    }

    /// Trigger a solve on the accumulated observations, persist on success.
    fn solve_and_save(&mut self, solver: &mut dyn CalibrationSolver) -> Result<(), SessionError> {
        let image_size = self.image_size.unwrap_or((0, 0));
        match solve_and_evaluate(
            &self.reference,
            self.accumulator.observations(),
            image_size,
            &self.options,
            solver,
        ) {
            Ok(result) => {
                info!(
                    "calibration succeeded, avg reprojection error {:.4}",
                    result.avg_reprojection_error
                );
                self.result = Some(result);
                self.state = SessionState::Calibrated;
                self.save_artifact()?;
            }
            Err(err) => {
                warn!("calibration failed ({err}), reverting to detection");
                self.state = SessionState::Detecting;
            }
        }
        Ok(())
    }

    fn save_artifact(&self) -> Result<(), ArtifactError> {
        let artifact = CalibrationArtifact::from_session(
            self.pattern,
            &self.geometry,
            self.image_size.unwrap_or((0, 0)),
            &self.options,
            self.result.as_ref(),
            &self.accumulator,
            self.write_extrinsics,
            self.write_points,
        );
        artifact.save(&self.output_path)?;
        info!("saved calibration artifact to {}", self.output_path.display());
        Ok(())
    }
}
