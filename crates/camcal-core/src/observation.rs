//! Frame-aligned observation bookkeeping.
//!
//! The accumulator is an append-only, single-pass store. Every attempted
//! frame consumes exactly one [`FrameOutcome`] slot in frame order; only
//! found frames contribute an [`Observation`]. Alignment invariants are
//! checked at every append instead of relying on implicit growth timing.

use serde::{Deserialize, Serialize};

use crate::math::Pt2;

/// Detected 2D image points for one successfully processed frame.
///
/// `points` has the same length and ordering as the session's reference
/// point set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub frame_index: usize,
    pub points: Vec<Pt2>,
}

/// Per-attempted-frame record, whether or not detection succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameOutcome {
    pub frame_index: usize,
    pub found: bool,
}

/// Bookkeeping violations. These indicate controller bugs, not bad input
/// images, and are therefore surfaced as hard errors.
#[derive(thiserror::Error, Debug)]
pub enum AccumulatorError {
    #[error("observation has {got} points, reference set has {expected}")]
    PointCountMismatch { expected: usize, got: usize },
    #[error("frame {got} appended out of order (expected frame {expected})")]
    FrameOrderMismatch { expected: usize, got: usize },
}

/// Append-only store for observations and frame outcomes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObservationAccumulator {
    expected_points: usize,
    observations: Vec<Observation>,
    outcomes: Vec<FrameOutcome>,
}

impl ObservationAccumulator {
    /// Create an accumulator for observations of `expected_points` points.
    pub fn new(expected_points: usize) -> Self {
        Self {
            expected_points,
            observations: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// Record a frame whose pattern was found, appending an observation.
    pub fn record_found(
        &mut self,
        frame_index: usize,
        points: Vec<Pt2>,
    ) -> Result<(), AccumulatorError> {
        self.check_frame_order(frame_index)?;
        if points.len() != self.expected_points {
            return Err(AccumulatorError::PointCountMismatch {
                expected: self.expected_points,
                got: points.len(),
            });
        }
        self.observations.push(Observation {
            frame_index,
            points,
        });
        self.outcomes.push(FrameOutcome {
            frame_index,
            found: true,
        });
        Ok(())
    }

    /// Record a frame whose pattern was not found (or not captured).
    ///
    /// The frame still consumes an outcome slot so bookkeeping stays
    /// index-aligned with the attempted frame count.
    pub fn record_missed(&mut self, frame_index: usize) -> Result<(), AccumulatorError> {
        self.check_frame_order(frame_index)?;
        self.outcomes.push(FrameOutcome {
            frame_index,
            found: false,
        });
        Ok(())
    }

    fn check_frame_order(&self, frame_index: usize) -> Result<(), AccumulatorError> {
        if frame_index != self.outcomes.len() {
            return Err(AccumulatorError::FrameOrderMismatch {
                expected: self.outcomes.len(),
                got: frame_index,
            });
        }
        Ok(())
    }

    /// Number of accumulated observations.
    pub fn count(&self) -> usize {
        self.observations.len()
    }

    /// Number of frames attempted so far.
    pub fn frames_attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// All observations, in frame order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// All per-frame outcomes, in frame order.
    pub fn outcomes(&self) -> &[FrameOutcome] {
        &self.outcomes
    }

    /// Found/not-found flag per attempted frame, in frame order.
    pub fn found_flags(&self) -> Vec<bool> {
        self.outcomes.iter().map(|o| o.found).collect()
    }

    /// Number of reference points every observation must carry.
    pub fn expected_points(&self) -> usize {
        self.expected_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(n: usize) -> Vec<Pt2> {
        (0..n).map(|i| Pt2::new(i as f64, i as f64)).collect()
    }

    #[test]
    fn found_flags_track_observation_count() {
        let mut acc = ObservationAccumulator::new(4);
        acc.record_found(0, points(4)).unwrap();
        acc.record_missed(1).unwrap();
        acc.record_found(2, points(4)).unwrap();

        assert_eq!(acc.count(), 2);
        assert_eq!(acc.frames_attempted(), 3);
        let flags = acc.found_flags();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(flags.iter().filter(|f| **f).count(), acc.count());
    }

    #[test]
    fn rejects_point_count_mismatch() {
        let mut acc = ObservationAccumulator::new(4);
        let err = acc.record_found(0, points(3)).unwrap_err();
        assert!(matches!(
            err,
            AccumulatorError::PointCountMismatch {
                expected: 4,
                got: 3
            }
        ));
        // the failed append must not have consumed a slot
        assert_eq!(acc.frames_attempted(), 0);
    }

    #[test]
    fn rejects_out_of_order_frames() {
        let mut acc = ObservationAccumulator::new(2);
        acc.record_missed(0).unwrap();
        let err = acc.record_found(3, points(2)).unwrap_err();
        assert!(matches!(
            err,
            AccumulatorError::FrameOrderMismatch {
                expected: 1,
                got: 3
            }
        ));
    }

    #[test]
    fn observations_keep_originating_frame_index() {
        let mut acc = ObservationAccumulator::new(1);
        acc.record_missed(0).unwrap();
        acc.record_found(1, points(1)).unwrap();
        acc.record_missed(2).unwrap();
        acc.record_found(3, points(1)).unwrap();

        let indices: Vec<usize> = acc.observations().iter().map(|o| o.frame_index).collect();
        assert_eq!(indices, vec![1, 3]);
    }
}
