//! Planar calibration board model.
//!
//! A board is described by its inner-point grid and physical spacing. The
//! reference layout is computed once per session and reused by value for
//! every observed frame, since the board does not move relative to itself.

use serde::{Deserialize, Serialize};

use crate::math::{Pt3, Real};

/// Kind of planar calibration pattern printed on the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Classic chessboard; reference points are the inner corners.
    Chessboard,
    /// Symmetric circle grid; reference points are the circle centers.
    CirclesGrid,
    /// Asymmetric circle grid with staggered rows.
    AsymmetricCirclesGrid,
}

/// Board geometry validation errors.
#[derive(thiserror::Error, Debug)]
pub enum BoardError {
    #[error("rows and cols must be >= 2 (got {rows}x{cols})")]
    InvalidSize { rows: u32, cols: u32 },
    #[error("square_size must be finite and > 0 (got {0})")]
    InvalidSquareSize(Real),
}

/// Inner-point counts and physical spacing of a calibration board.
///
/// `rows`/`cols` are **inner point counts** (corners for a chessboard,
/// circle centers for a circle grid), not square counts. `square_size` is
/// the physical square side or circle spacing in user units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    pub rows: u32,
    pub cols: u32,
    pub square_size: Real,
}

impl BoardGeometry {
    /// Validate and create a board geometry.
    pub fn new(rows: u32, cols: u32, square_size: Real) -> Result<Self, BoardError> {
        if rows < 2 || cols < 2 {
            return Err(BoardError::InvalidSize { rows, cols });
        }
        if !square_size.is_finite() || square_size <= 0.0 {
            return Err(BoardError::InvalidSquareSize(square_size));
        }
        Ok(Self {
            rows,
            cols,
            square_size,
        })
    }

    /// Number of reference points on the board.
    pub fn point_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

/// Compute the canonical 3D reference-point layout for a board.
///
/// Points are ordered row-major with `z = 0`:
/// - chessboard / symmetric circle grid: `(j*s, i*s, 0)`,
/// - asymmetric circle grid: `((2*j + i%2)*s, i*s, 0)`, encoding the
///   staggered-row offset of asymmetric circle targets.
///
/// Pure function of its inputs; call once per session.
pub fn reference_points(geometry: &BoardGeometry, pattern: PatternType) -> Vec<Pt3> {
    let s = geometry.square_size;
    let mut points = Vec::with_capacity(geometry.point_count());
    for i in 0..geometry.rows {
        for j in 0..geometry.cols {
            let x = match pattern {
                PatternType::Chessboard | PatternType::CirclesGrid => Real::from(j) * s,
                PatternType::AsymmetricCirclesGrid => Real::from(2 * j + i % 2) * s,
            };
            points.push(Pt3::new(x, Real::from(i) * s, 0.0));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(matches!(
            BoardGeometry::new(1, 5, 0.03),
            Err(BoardError::InvalidSize { .. })
        ));
        assert!(matches!(
            BoardGeometry::new(4, 5, 0.0),
            Err(BoardError::InvalidSquareSize(_))
        ));
        assert!(matches!(
            BoardGeometry::new(4, 5, Real::NAN),
            Err(BoardError::InvalidSquareSize(_))
        ));
    }

    #[test]
    fn layout_has_one_point_per_grid_cell() {
        for pattern in [
            PatternType::Chessboard,
            PatternType::CirclesGrid,
            PatternType::AsymmetricCirclesGrid,
        ] {
            let geometry = BoardGeometry::new(6, 9, 0.025).unwrap();
            let points = reference_points(&geometry, pattern);
            assert_eq!(points.len(), 6 * 9);
            assert!(points.iter().all(|p| p.z == 0.0));
        }
    }

    #[test]
    fn chessboard_layout_is_row_major() {
        let geometry = BoardGeometry::new(3, 4, 0.5).unwrap();
        let points = reference_points(&geometry, PatternType::Chessboard);
        // point (i, j) lives at index i*cols + j
        assert_eq!(points[0], Pt3::new(0.0, 0.0, 0.0));
        assert_eq!(points[3], Pt3::new(1.5, 0.0, 0.0));
        assert_eq!(points[4], Pt3::new(0.0, 0.5, 0.0));
        assert_eq!(points[11], Pt3::new(1.5, 1.0, 0.0));
    }

    #[test]
    fn asymmetric_layout_staggers_odd_rows() {
        let geometry = BoardGeometry::new(4, 3, 2.0).unwrap();
        let points = reference_points(&geometry, PatternType::AsymmetricCirclesGrid);
        for i in 0..4u32 {
            for j in 0..3u32 {
                let p = points[(i * 3 + j) as usize];
                assert_eq!(p.x, Real::from(2 * j + i % 2) * 2.0);
                assert_eq!(p.y, Real::from(i) * 2.0);
            }
        }
    }

    #[test]
    fn pattern_type_serde_names() {
        let json = serde_json::to_string(&PatternType::AsymmetricCirclesGrid).unwrap();
        assert_eq!(json, "\"asymmetric_circles_grid\"");
        assert!(serde_json::from_str::<PatternType>("\"hexagon_grid\"").is_err());
    }
}
