//! Rectification quality scoring from matched features.
//!
//! After rectification a correct calibration leaves no offset across the
//! epipolar direction: rows for horizontal pairs, columns for vertical
//! pairs. The residual offset of matched features is the quality signal.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::features::{extract_features, match_features, FeatureConfig, MatchConfig};
use crate::rectify::{BaselineAxis, StereoRectification};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub matching: MatchConfig,
    /// Only the closest matches (by descriptor distance) enter the statistics.
    pub max_matches: usize,
    pub min_matches: usize,
    pub max_mean_px: f64,
    pub max_std_px: f64,
    pub max_max_px: f64,
    pub features: FeatureConfig,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            matching: MatchConfig::default(),
            max_matches: 200,
            min_matches: 20,
            max_mean_px: 2.0,
            max_std_px: 1.5,
            max_max_px: 5.0,
            features: FeatureConfig::default(),
        }
    }
}

/// Image axis along which residual misalignment is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisparityAxis {
    /// `|y1 - y2|`
    Rows,
    /// `|x1 - x2|`
    Columns,
}

impl DisparityAxis {
    /// The axis perpendicular to the epipolar lines of a rectified pair.
    pub fn across(baseline: BaselineAxis) -> Self {
        match baseline {
            BaselineAxis::Horizontal => Self::Rows,
            BaselineAxis::Vertical => Self::Columns,
        }
    }
}

/// Per-pair entry of the validation report.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PairValidation {
    pub mean_vertical_disparity: f64,
    pub std_vertical_disparity: f64,
    pub max_vertical_disparity: f64,
    pub num_matches: usize,
    pub quality_good: bool,
}

impl PairValidation {
    /// A pair whose feature stage produced nothing usable.
    pub fn failed() -> Self {
        Self::default()
    }
}

/// Score residual disparities against the configured thresholds.
///
/// `num_matches` is the number of accepted matches before capping;
/// `disparities` are the (already capped) absolute offsets.
pub fn judge_disparities(disparities: &[f64], num_matches: usize, cfg: &ValidationConfig) -> PairValidation {
    if disparities.is_empty() {
        return PairValidation {
            num_matches,
            ..PairValidation::failed()
        };
    }
    let n = disparities.len() as f64;
    let mean = disparities.iter().sum::<f64>() / n;
    let var = disparities.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    let max = disparities.iter().copied().fold(0.0, f64::max);
    let quality_good = num_matches >= cfg.min_matches
        && mean < cfg.max_mean_px
        && std < cfg.max_std_px
        && max < cfg.max_max_px;
    PairValidation {
        mean_vertical_disparity: mean,
        std_vertical_disparity: std,
        max_vertical_disparity: max,
        num_matches,
        quality_good,
    }
}

/// Rectify a raw image pair and score its residual misalignment.
pub fn validate_pair(
    rect: &StereoRectification,
    raw1: &GrayImage,
    raw2: &GrayImage,
    cfg: &ValidationConfig,
) -> PairValidation {
    let img1 = rect.first.apply(raw1);
    let img2 = rect.second.apply(raw2);
    let f1 = extract_features(&img1, &cfg.features);
    let f2 = extract_features(&img2, &cfg.features);
    if f1.is_empty() || f2.is_empty() {
        tracing::warn!(left = f1.len(), right = f2.len(), "feature detection found nothing");
        return PairValidation::failed();
    }

    let mut matches = match_features(&f1, &f2, &cfg.matching);
    let num_matches = matches.len();
    matches.sort_by_key(|m| (m.distance, m.query));
    matches.truncate(cfg.max_matches);

    let axis = DisparityAxis::across(rect.axis);
    let disparities: Vec<f64> = matches
        .iter()
        .map(|m| {
            let a = f1.keypoints[m.query];
            let b = f2.keypoints[m.train];
            match axis {
                DisparityAxis::Rows => (a.y - b.y).abs() as f64,
                DisparityAxis::Columns => (a.x - b.x).abs() as f64,
            }
        })
        .collect();

    let result = judge_disparities(&disparities, num_matches, cfg);
    tracing::debug!(
        matches = num_matches,
        mean = result.mean_vertical_disparity,
        max = result.max_vertical_disparity,
        pass = result.quality_good,
        "pair validated"
    );
    result
}
