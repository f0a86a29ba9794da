//! Persisted calibration artifact.
//!
//! The artifact is a self-describing key-value JSON document holding the
//! session inputs (board geometry, pattern, flags), the solved parameters,
//! and the reprojection diagnostics. The schema and key names, including
//! `found_cheese_board`, are kept compatible with the original tool's
//! output so existing downstream readers keep working.
//!
//! Writes go through a sibling temp file followed by a rename, so a failed
//! write never leaves a partial artifact in place.

use std::fs;
use std::path::Path;

use log::debug;
use serde_json::{json, Map, Value};

use camcal_core::{
    BoardGeometry, CameraMatrix, DistortionCoeffs, ObservationAccumulator, PatternType, Pt2, Real,
};

use crate::engine::{CalibrationResult, SolveOptions};

/// Artifact persistence errors.
#[derive(thiserror::Error, Debug)]
pub enum ArtifactError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("artifact is missing key \"{0}\"")]
    MissingKey(&'static str),
    #[error("artifact key \"{key}\" is malformed: {reason}")]
    Malformed { key: &'static str, reason: String },
}

/// Everything a finished session persists.
#[derive(Clone, Debug)]
pub struct CalibrationArtifact {
    pub pattern: PatternType,
    pub board: BoardGeometry,
    pub image_size: (u32, u32),
    pub options: SolveOptions,
    pub result: Option<CalibrationResult>,
    /// Whether per-pose extrinsics and per-view errors are serialized.
    pub write_extrinsics: bool,
    /// Found/not-found flag per attempted frame, frame-indexed.
    pub found_flags: Vec<bool>,
    /// Raw detected points per observation, when point persistence is on.
    pub image_points: Option<Vec<Vec<Pt2>>>,
}

impl CalibrationArtifact {
    /// Assemble an artifact from session state.
    #[allow(clippy::too_many_arguments)]
    pub fn from_session(
        pattern: PatternType,
        board: &BoardGeometry,
        image_size: (u32, u32),
        options: &SolveOptions,
        result: Option<&CalibrationResult>,
        accumulator: &ObservationAccumulator,
        write_extrinsics: bool,
        write_points: bool,
    ) -> Self {
        let image_points = write_points.then(|| {
            accumulator
                .observations()
                .iter()
                .map(|o| o.points.clone())
                .collect()
        });
        Self {
            pattern,
            board: *board,
            image_size,
            options: *options,
            result: result.cloned(),
            write_extrinsics,
            found_flags: accumulator.found_flags(),
            image_points,
        }
    }

    /// Serialize to the key-value schema.
    pub fn to_json_value(&self) -> Value {
        let mut doc = Map::new();
        doc.insert(
            "calibration_time".into(),
            Value::String(chrono::Local::now().format("%a %b %e %T %Y").to_string()),
        );
        if let Some(result) = &self.result {
            doc.insert("nframes".into(), json!(result.poses.len()));
        }
        doc.insert("image_width".into(), json!(self.image_size.0));
        doc.insert("image_height".into(), json!(self.image_size.1));
        doc.insert("board_width".into(), json!(self.board.cols));
        doc.insert("board_height".into(), json!(self.board.rows));
        doc.insert("square_size".into(), json!(self.board.square_size));
        doc.insert("pattern".into(), json!(self.pattern));

        if self.options.fix_aspect_ratio {
            if let Some(aspect) = self.options.aspect_ratio {
                doc.insert("aspectRatio".into(), json!(aspect));
            }
        }
        doc.insert("flags".into(), json!(self.options.bits()));
        doc.insert("flags_summary".into(), json!(self.options.summary()));

        if let Some(result) = &self.result {
            doc.insert(
                "camera_matrix".into(),
                mat3_to_value(&result.camera_matrix),
            );
            doc.insert(
                "distortion_coefficients".into(),
                json!(result.distortion.0.to_vec()),
            );
            doc.insert(
                "avg_reprojection_error".into(),
                json!(result.avg_reprojection_error),
            );
            if self.write_extrinsics {
                doc.insert(
                    "per_view_reprojection_errors".into(),
                    json!(result.per_view_errors),
                );
                let mut big: Vec<[Real; 6]> = Vec::with_capacity(result.poses.len());
                for (i, pose) in result.poses.iter().enumerate() {
                    let r = pose.rotation_matrix();
                    let rows: Vec<Vec<Real>> = (0..3)
                        .map(|row| (0..3).map(|col| r[(row, col)]).collect())
                        .collect();
                    doc.insert(format!("extrinsic_R{i}"), json!(rows));
                    doc.insert(
                        format!("extrinsic_T{i}"),
                        json!([pose.tvec.x, pose.tvec.y, pose.tvec.z]),
                    );
                    big.push([
                        pose.rvec.x, pose.rvec.y, pose.rvec.z, pose.tvec.x, pose.tvec.y,
                        pose.tvec.z,
                    ]);
                }
                doc.insert("extrinsic".into(), json!(big));
            }
        }

        doc.insert(
            "found_cheese_board".into(),
            json!(self
                .found_flags
                .iter()
                .map(|f| u8::from(*f))
                .collect::<Vec<u8>>()),
        );

        if let Some(points) = &self.image_points {
            let rows: Vec<Vec<[Real; 2]>> = points
                .iter()
                .map(|view| view.iter().map(|p| [p.x, p.y]).collect())
                .collect();
            doc.insert("image_points".into(), json!(rows));
        }

        Value::Object(doc)
    }

    /// Persist the artifact as pretty JSON.
    ///
    /// Serialization happens fully in memory; the bytes then go to a
    /// sibling temp file that is renamed over the destination, so an I/O
    /// failure cannot leave a partial file that parses as a valid artifact.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.to_json_value())?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = Path::new(&tmp);
        fs::write(tmp, json).inspect_err(|_| {
            let _ = fs::remove_file(tmp);
        })?;
        fs::rename(tmp, path)?;
        debug!("artifact written to {}", path.display());
        Ok(())
    }
}

fn mat3_to_value(m: &CameraMatrix) -> Value {
    let rows = m.to_rows();
    json!([rows[0], rows[1], rows[2]])
}

fn rows_from_value(value: &Value, key: &'static str) -> Result<[[Real; 3]; 3], ArtifactError> {
    let malformed = |reason: &str| ArtifactError::Malformed {
        key,
        reason: reason.to_string(),
    };
    let rows = value.as_array().ok_or_else(|| malformed("not an array"))?;
    if rows.len() != 3 {
        return Err(malformed("expected 3 rows"));
    }
    let mut out = [[0.0; 3]; 3];
    for (r, row) in rows.iter().enumerate() {
        let cols = row.as_array().ok_or_else(|| malformed("row not an array"))?;
        if cols.len() != 3 {
            return Err(malformed("expected 3 columns"));
        }
        for (c, v) in cols.iter().enumerate() {
            out[r][c] = v.as_f64().ok_or_else(|| malformed("entry not a number"))?;
        }
    }
    Ok(out)
}

/// Reload only the camera matrix and distortion vector from an artifact.
///
/// The partial read path for downstream undistortion: no session state is
/// reconstructed.
pub fn load_intrinsics(
    path: impl AsRef<Path>,
) -> Result<(CameraMatrix, DistortionCoeffs), ArtifactError> {
    let raw = fs::read_to_string(path)?;
    let doc: Value = serde_json::from_str(&raw)?;

    let camera = doc
        .get("camera_matrix")
        .ok_or(ArtifactError::MissingKey("camera_matrix"))?;
    let camera_matrix = CameraMatrix::from_rows(rows_from_value(camera, "camera_matrix")?);

    let key = "distortion_coefficients";
    let coeffs = doc.get(key).ok_or(ArtifactError::MissingKey(key))?;
    let coeffs = coeffs
        .as_array()
        .ok_or_else(|| ArtifactError::Malformed {
            key,
            reason: "not an array".to_string(),
        })?
        .iter()
        .map(|v| v.as_f64())
        .collect::<Option<Vec<Real>>>()
        .ok_or_else(|| ArtifactError::Malformed {
            key,
            reason: "entry not a number".to_string(),
        })?;
    let mut distortion = DistortionCoeffs::zeros();
    if coeffs.len() > 8 {
        return Err(ArtifactError::Malformed {
            key,
            reason: format!("expected at most 8 coefficients, got {}", coeffs.len()),
        });
    }
    distortion.0[..coeffs.len()].copy_from_slice(&coeffs);

    Ok((camera_matrix, distortion))
}
