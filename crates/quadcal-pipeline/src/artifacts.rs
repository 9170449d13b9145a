//! Persisted calibration artifacts.
//!
//! File names and JSON keys are fixed so downstream stereo tooling can
//! load them without knowing about sessions:
//!
//! | file | content |
//! |---|---|
//! | `unified_intrinsics.json` | per camera K, distortion, residual |
//! | `unified_poses.json` | per camera rvec and centroid-relative tvec |
//! | `unified_stereoMap_{c1}{c2}.json` | remap tables, ROIs, R/P/Q per pair |
//! | `rectification_validation.json` | [`ValidationReport`] |
//! | `unified_calibration_summary.json` | [`CalibrationSummary`] |
//! | `rectified_test_{c1}{c2}.png` | rectified pair with guide lines |
//! | `alignment_verification_{c1}{c2}.png` | tinted overlay of a rectified pair |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{GrayImage, RgbImage};
use nalgebra::{Matrix3x4, Matrix4};
use quadcal_core::{mat3_to_rows, CameraPair, ImageSize, Real, RigLayout, NUM_CAMERAS};
use quadcal_imaging::overlay::{alignment_overlay, rectified_pair};
use quadcal_imaging::{PairValidation, StereoRectification};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::quad_rig::{QuadRigOutput, QuadRigProblem};
use crate::session::CalibrationSession;

pub const INTRINSICS_FILE: &str = "unified_intrinsics.json";
pub const POSES_FILE: &str = "unified_poses.json";
pub const VALIDATION_FILE: &str = "rectification_validation.json";
pub const SUMMARY_FILE: &str = "unified_calibration_summary.json";

pub fn stereo_map_file(pair: CameraPair) -> String {
    format!("unified_stereoMap_{}.json", pair.name())
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation report
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityVerdict {
    Good,
    NeedsImprovement,
}

/// Outcome of rectification validation across all pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub timestamp: u64,
    pub overall_quality: QualityVerdict,
    /// Keyed by pair name, e.g. `"03"`.
    pub pair_results: BTreeMap<String, PairValidation>,
}

impl ValidationReport {
    /// Overall quality is good only if there is at least one pair and
    /// every pair passed.
    pub fn new(timestamp: u64, results: impl IntoIterator<Item = (CameraPair, PairValidation)>) -> Self {
        let pair_results: BTreeMap<String, PairValidation> =
            results.into_iter().map(|(pair, r)| (pair.name(), r)).collect();
        let good = !pair_results.is_empty() && pair_results.values().all(|r| r.quality_good);
        Self {
            timestamp,
            overall_quality: if good {
                QualityVerdict::Good
            } else {
                QualityVerdict::NeedsImprovement
            },
            pair_results,
        }
    }

    pub fn is_good(&self) -> bool {
        self.overall_quality == QualityVerdict::Good
    }

    /// Names of the pairs that failed.
    pub fn failed_pairs(&self) -> Vec<&str> {
        self.pair_results
            .iter()
            .filter(|(_, r)| !r.quality_good)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary
// ─────────────────────────────────────────────────────────────────────────────

/// Audit record of one calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub timestamp: u64,
    pub frames_captured: usize,
    pub reference_system: String,
    pub camera_config: [[usize; 2]; 2],
    pub use_highres_intrinsics: bool,
    pub camera_matrices: BTreeMap<usize, [[Real; 3]; 3]>,
    /// OpenCV order `[k1, k2, p1, p2, k3]`.
    pub distortion_coeffs: BTreeMap<usize, [Real; 5]>,
    pub rotation_vectors: BTreeMap<usize, [Real; 3]>,
    pub translation_vectors: BTreeMap<usize, [Real; 3]>,
}

impl CalibrationSummary {
    pub fn new(output: &QuadRigOutput, layout: &RigLayout, timestamp: u64) -> Self {
        let calibrated = || {
            output
                .intrinsics
                .iter()
                .enumerate()
                .filter_map(|(cam, intr)| intr.as_ref().map(|i| (cam, i)))
        };
        Self {
            timestamp,
            frames_captured: output.frames_captured,
            reference_system: "center_point".to_string(),
            camera_config: layout.grid,
            use_highres_intrinsics: output.use_highres_intrinsics,
            camera_matrices: calibrated().map(|(cam, i)| (cam, mat3_to_rows(&i.k_matrix()))).collect(),
            distortion_coeffs: calibrated().map(|(cam, i)| (cam, i.dist.to_coeffs())).collect(),
            rotation_vectors: (0..NUM_CAMERAS)
                .map(|cam| (cam, output.poses[cam].rvec.into()))
                .collect(),
            translation_vectors: (0..NUM_CAMERAS)
                .map(|cam| (cam, output.poses[cam].tvec.into()))
                .collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-file records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicsRecord {
    pub camera_matrix: [[Real; 3]; 3],
    pub distortion_coeffs: [Real; 5],
    pub reprojection_error: Real,
    pub image_size: ImageSize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicsArtifact {
    pub use_highres_intrinsics: bool,
    /// Calibrated cameras only.
    pub cameras: BTreeMap<usize, IntrinsicsRecord>,
}

impl IntrinsicsArtifact {
    pub fn new(output: &QuadRigOutput) -> Self {
        let cameras = output
            .intrinsics
            .iter()
            .enumerate()
            .filter_map(|(cam, intr)| {
                let intr = intr.as_ref()?;
                Some((
                    cam,
                    IntrinsicsRecord {
                        camera_matrix: mat3_to_rows(&intr.k_matrix()),
                        distortion_coeffs: intr.dist.to_coeffs(),
                        reprojection_error: intr.reproj_error,
                        image_size: intr.image_size,
                    },
                ))
            })
            .collect();
        Self {
            use_highres_intrinsics: output.use_highres_intrinsics,
            cameras,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub rvec: [Real; 3],
    pub tvec: [Real; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosesArtifact {
    pub reference_system: String,
    pub cameras: BTreeMap<usize, PoseRecord>,
}

impl PosesArtifact {
    pub fn new(output: &QuadRigOutput) -> Self {
        Self {
            reference_system: "center_point".to_string(),
            cameras: output
                .poses
                .iter()
                .enumerate()
                .map(|(cam, p)| {
                    (
                        cam,
                        PoseRecord {
                            rvec: p.rvec.into(),
                            tvec: p.tvec.into(),
                        },
                    )
                })
                .collect(),
        }
    }
}

fn rows_3x4(m: &Matrix3x4<Real>) -> [[Real; 4]; 3] {
    std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)]))
}

fn rows_4x4(m: &Matrix4<Real>) -> [[Real; 4]; 4] {
    std::array::from_fn(|r| std::array::from_fn(|c| m[(r, c)]))
}

/// Rectification maps of one pair in the layout stereo consumers expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoMapArtifact {
    #[serde(rename = "stereoMap1_x")]
    pub map1_x: Vec<Vec<f32>>,
    #[serde(rename = "stereoMap1_y")]
    pub map1_y: Vec<Vec<f32>>,
    #[serde(rename = "stereoMap2_x")]
    pub map2_x: Vec<Vec<f32>>,
    #[serde(rename = "stereoMap2_y")]
    pub map2_y: Vec<Vec<f32>>,
    /// `[x, y, width, height]`.
    #[serde(rename = "Roi1")]
    pub roi1: [i32; 4],
    #[serde(rename = "Roi2")]
    pub roi2: [i32; 4],
    #[serde(rename = "R1")]
    pub r1: [[Real; 3]; 3],
    #[serde(rename = "R2")]
    pub r2: [[Real; 3]; 3],
    #[serde(rename = "P1")]
    pub p1: [[Real; 4]; 3],
    #[serde(rename = "P2")]
    pub p2: [[Real; 4]; 3],
    #[serde(rename = "Q")]
    pub q: [[Real; 4]; 4],
}

impl StereoMapArtifact {
    pub fn new(rect: &StereoRectification) -> Self {
        Self {
            map1_x: rect.first.map.rows_x(),
            map1_y: rect.first.map.rows_y(),
            map2_x: rect.second.map.rows_x(),
            map2_y: rect.second.map.rows_y(),
            roi1: rect.first.roi.to_array(),
            roi2: rect.second.roi.to_array(),
            r1: mat3_to_rows(&rect.first.rotation),
            r2: mat3_to_rows(&rect.second.rotation),
            p1: rows_3x4(&rect.first.projection),
            p2: rows_3x4(&rect.second.projection),
            q: rows_4x4(&rect.q),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writers
// ─────────────────────────────────────────────────────────────────────────────

/// Serialize `value` as pretty JSON into `dir/name`.
///
/// # Errors
///
/// Serialization or filesystem failure.
pub fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
    let path = dir.join(name);
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    debug!(path = %path.display(), "artifact written");
    Ok(path)
}

/// Read an artifact written by [`write_json`].
///
/// # Errors
///
/// Filesystem or parse failure.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}

fn write_png(dir: &Path, name: &str, img: &RgbImage) -> Result<PathBuf> {
    let path = dir.join(name);
    img.save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Write every artifact the session has results for into `dir`.
///
/// Requires a finalized session. Stereo maps are written for every pair
/// with rectification maps in state; images only when `images` are given.
/// Records the summary as a session export.
///
/// # Errors
///
/// No output yet, or any filesystem failure.
pub fn write_artifacts(
    session: &mut CalibrationSession<QuadRigProblem>,
    dir: &Path,
    images: Option<&[GrayImage; NUM_CAMERAS]>,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let output = session.require_output()?.clone();
    let mut written = vec![
        write_json(dir, INTRINSICS_FILE, &IntrinsicsArtifact::new(&output))?,
        write_json(dir, POSES_FILE, &PosesArtifact::new(&output))?,
    ];

    let overlay = session.config.overlay;
    for (pair, rect) in &session.state.rectifications {
        written.push(write_json(dir, &stereo_map_file(*pair), &StereoMapArtifact::new(rect))?);
        let Some(images) = images else {
            continue;
        };
        let r1 = rect.first.apply(&images[pair.first]);
        let r2 = rect.second.apply(&images[pair.second]);
        let side_by_side = rectified_pair(&r1, &r2, rect.axis);
        written.push(write_png(dir, &format!("rectified_test_{}.png", pair.name()), &side_by_side)?);
        if overlay.enabled {
            let blended = alignment_overlay(&r1, &r2, (pair.first, pair.second), rect.axis, overlay.alpha);
            written.push(write_png(
                dir,
                &format!("alignment_verification_{}.png", pair.name()),
                &blended,
            )?);
        }
    }

    if let Some(report) = &output.validation {
        written.push(write_json(dir, VALIDATION_FILE, report)?);
    }
    let summary = session.export()?;
    written.push(write_json(dir, SUMMARY_FILE, &summary)?);

    info!(dir = %dir.display(), files = written.len(), "calibration artifacts written");
    Ok(written)
}
