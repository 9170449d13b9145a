//! Chessboard Target Detector.
//!
//! Pipeline per camera image: brightness compensation (caller), contrast
//! normalization, light blur, then an ordered list of increasingly
//! permissive [`DetectorAttempt`]s for every configured grid size. Each
//! attempt runs the ChESS corner detector and chessboard grid labelling
//! from `chess-corners` / `calib-targets`. The first attempt that labels a
//! complete grid wins and its corners are refined to sub-pixel precision.
//! Not finding the target is a normal outcome and returns `None`.

pub mod subpix;

use calib_targets::{detect, ChessboardParams};
use chess_corners::ChessConfig;
use image::GrayImage;
use quadcal_core::{Pt2, Pt3, Real};
use serde::{Deserialize, Serialize};

use crate::enhance::normalize_contrast;
use crate::sample::to_float;
pub use subpix::SubpixConfig;

/// Physical description of the calibration board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Candidate inner-corner grids `(cols, rows)`, tried in order.
    pub grid_sizes: Vec<(usize, usize)>,
    pub square_size_mm: Real,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            grid_sizes: vec![(8, 6)],
            square_size_mm: 25.0,
        }
    }
}

impl TargetConfig {
    /// Board-frame corner positions (Z = 0) in detector order for `pattern`.
    pub fn object_points(&self, pattern: (usize, usize)) -> Vec<Pt3> {
        let (cols, rows) = pattern;
        (0..rows)
            .flat_map(|j| (0..cols).map(move |i| (i, j)))
            .map(|(i, j)| {
                Pt3::new(
                    i as Real * self.square_size_mm,
                    j as Real * self.square_size_mm,
                    0.0,
                )
            })
            .collect()
    }
}

/// One ChESS front-end setting in the fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorAttempt {
    /// Response threshold relative to the strongest response.
    pub threshold_rel: f32,
    pub nms_radius: u32,
}

impl DetectorAttempt {
    fn chess_config(&self) -> ChessConfig {
        let mut chess = detect::default_chess_config();
        chess.params.threshold_rel = self.threshold_rel;
        chess.params.nms_radius = self.nms_radius;
        chess
    }
}

fn board_params(cols: usize, rows: usize) -> ChessboardParams {
    ChessboardParams {
        expected_rows: Some(rows as u32),
        expected_cols: Some(cols as u32),
        ..ChessboardParams::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub gain: f32,
    pub offset: f32,
    pub blur_sigma: f32,
    /// Tried in order; later entries are more permissive.
    pub attempts: Vec<DetectorAttempt>,
    pub subpix: SubpixConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let attempt = |threshold_rel, nms_radius| DetectorAttempt {
            threshold_rel,
            nms_radius,
        };
        Self {
            gain: 1.3,
            offset: 20.0,
            blur_sigma: 0.8,
            attempts: vec![attempt(0.2, 2), attempt(0.1, 2), attempt(0.05, 1)],
            subpix: SubpixConfig::default(),
        }
    }
}

/// Successful detection: corners in row-major board order.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDetection {
    pub corners: Vec<Pt2>,
    pub pattern: (usize, usize),
    /// Index into [`DetectorConfig::attempts`] that succeeded.
    pub attempt: usize,
}

/// Run the Target Detector on one camera image.
pub fn detect_target(img: &GrayImage, target: &TargetConfig, cfg: &DetectorConfig) -> Option<TargetDetection> {
    let prepared = normalize_contrast(img, cfg.gain, cfg.offset, cfg.blur_sigma);

    for &(cols, rows) in &target.grid_sizes {
        for (idx, attempt) in cfg.attempts.iter().enumerate() {
            let Some(result) = detect::detect_chessboard(&prepared, &attempt.chess_config(), board_params(cols, rows))
            else {
                continue;
            };
            let labeled: Vec<((i64, i64), Pt2)> = result
                .detection
                .corners
                .iter()
                .filter_map(|c| {
                    let grid = c.grid.as_ref()?;
                    let p = Pt2::new(c.position.x as Real, c.position.y as Real);
                    Some(((grid.i as i64, grid.j as i64), p))
                })
                .collect();
            let Some(mut corners) = order_grid(&labeled, cols, rows) else {
                tracing::trace!(cols, rows, attempt = idx, labeled = labeled.len(), "incomplete grid");
                continue;
            };
            subpix::refine_corners(&to_float(&prepared), &mut corners, &cfg.subpix);
            tracing::trace!(cols, rows, attempt = idx, "target found");
            return Some(TargetDetection {
                corners,
                pattern: (cols, rows),
                attempt: idx,
            });
        }
    }
    None
}

/// Arrange grid-labelled corners row-major, starting at the corner nearest
/// the image origin with rows running along +x.
///
/// Returns `None` unless the labels cover exactly a `cols × rows` grid,
/// in either axis assignment, with one corner per cell.
fn order_grid(labeled: &[((i64, i64), Pt2)], cols: usize, rows: usize) -> Option<Vec<Pt2>> {
    if cols == 0 || rows == 0 || labeled.len() != cols * rows {
        return None;
    }
    let min_i = labeled.iter().map(|((i, _), _)| *i).min()?;
    let max_i = labeled.iter().map(|((i, _), _)| *i).max()?;
    let min_j = labeled.iter().map(|((_, j), _)| *j).min()?;
    let max_j = labeled.iter().map(|((_, j), _)| *j).max()?;
    let extent = ((max_i - min_i + 1) as usize, (max_j - min_j + 1) as usize);
    let transposed = if extent == (cols, rows) {
        false
    } else if extent == (rows, cols) {
        true
    } else {
        return None;
    };

    let mut cells: Vec<Option<Pt2>> = vec![None; cols * rows];
    for &((i, j), p) in labeled {
        let (i, j) = ((i - min_i) as usize, (j - min_j) as usize);
        let (c, r) = if transposed { (j, i) } else { (i, j) };
        let cell = &mut cells[r * cols + c];
        if cell.is_some() {
            return None;
        }
        *cell = Some(p);
    }
    let mut corners: Vec<Pt2> = cells.into_iter().collect::<Option<_>>()?;

    if corners[cols - 1].x < corners[0].x {
        corners.chunks_mut(cols).for_each(<[Pt2]>::reverse);
    }
    if corners[(rows - 1) * cols].y < corners[0].y {
        corners = corners.chunks(cols).rev().flatten().copied().collect();
    }
    Some(corners)
}
