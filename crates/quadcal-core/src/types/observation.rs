//! Observation types for calibration data.
//!
//! A [`CorrespondenceView`] is one camera's view of the calibration target in
//! one frame: target-plane points paired with detected pixel corners.

use crate::{Pt2, Pt3, Real};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// 2D-3D point correspondences for a single camera in a single frame.
///
/// # Example
///
/// ```
/// use quadcal_core::{CorrespondenceView, Pt2, Pt3};
///
/// let points_3d = vec![Pt3::new(0.0, 0.0, 0.0), Pt3::new(25.0, 0.0, 0.0)];
/// let points_2d = vec![Pt2::new(320.0, 200.0), Pt2::new(360.0, 200.0)];
/// let view = CorrespondenceView::new(points_3d, points_2d).unwrap();
/// assert_eq!(view.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrespondenceView {
    /// Target-plane points (Z = 0) in millimetres.
    pub points_3d: Vec<Pt3>,
    /// Detected corners in pixels, index-aligned with `points_3d`.
    pub points_2d: Vec<Pt2>,
}

impl CorrespondenceView {
    /// # Errors
    ///
    /// Returns an error if the 3D and 2D point counts don't match.
    pub fn new(points_3d: Vec<Pt3>, points_2d: Vec<Pt2>) -> Result<Self> {
        ensure!(
            points_3d.len() == points_2d.len(),
            "3D / 2D point counts must match: {} vs {}",
            points_3d.len(),
            points_2d.len()
        );
        Ok(Self {
            points_3d,
            points_2d,
        })
    }

    /// Target points projected onto the board plane (drop Z).
    pub fn planar_points(&self) -> Vec<Pt2> {
        self.points_3d
            .iter()
            .map(|p3| Pt2::new(p3.x, p3.y))
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points_3d.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points_3d.is_empty()
    }

    /// Iterate over (3D point, 2D point) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Pt3, &Pt2)> {
        self.points_3d.iter().zip(self.points_2d.iter())
    }
}

/// Summary statistics for reprojection errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionStats {
    /// Mean reprojection error in pixels.
    pub mean: Real,
    /// Root mean square error in pixels.
    pub rms: Real,
    /// Maximum reprojection error in pixels.
    pub max: Real,
    /// Number of points evaluated.
    pub count: usize,
}

impl ReprojectionStats {
    /// Compute statistics from per-point pixel errors.
    pub fn from_errors(errors: &[Real]) -> Self {
        if errors.is_empty() {
            return Self::default();
        }

        let sum: Real = errors.iter().sum();
        let sum_sq: Real = errors.iter().map(|e| e * e).sum();
        let max = errors.iter().cloned().fold(0.0, Real::max);
        let n = errors.len() as Real;

        Self {
            mean: sum / n,
            rms: (sum_sq / n).sqrt(),
            max,
            count: errors.len(),
        }
    }
}
