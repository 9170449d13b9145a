//! Core math and geometry primitives for `quadcal`.
//!
//! This crate contains:
//! - linear algebra type aliases (`Real`, `Vec2`, `Pt3`, ...) and
//!   rotation-vector helpers,
//! - a composable pinhole camera model (projection + distortion + intrinsics),
//! - observation and calibration data types shared by every pipeline stage
//!   ([`CorrespondenceView`], [`CalibrationFrame`], [`CorrespondenceStore`],
//!   [`CameraIntrinsics`], [`CameraPose`]),
//! - deterministic synthetic data generators for tests.
//!
//! Camera pipeline:
//! `pixel = K ∘ distortion ∘ projection(dir)`
//!
//! Rig convention: poses live in a centroid-based frame whose axes are the
//! reference camera's axes. A camera with rotation `R` and position `p`
//! maps a rig point `X` to camera coordinates as `R · (X - p)`.

/// Linear algebra type aliases and helpers.
pub mod math;
/// Camera models and distortion utilities.
pub mod models;
/// Deterministic synthetic data for tests and demos.
pub mod synthetic;
/// Observation and calibration data types.
pub mod types;

pub use math::*;
pub use models::*;
pub use types::*;
