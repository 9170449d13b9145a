//! Image processing for the four-camera rig.
//!
//! Everything operates on 8-bit grayscale [`image::GrayImage`] buffers;
//! intermediate float images use [`FloatImage`].
//!
//! - [`frame`]: splitting the combined sensor image into per-camera views,
//! - [`enhance`]: brightness compensation, contrast normalization, blur,
//! - [`detect`]: chessboard Target Detector (`calib-targets` grid labelling
//!   over ChESS corners, sub-pixel refinement),
//! - [`rectify`] / [`remap`]: stereo rectification and remap tables,
//! - [`features`] / [`quality`]: oriented multi-scale binary features,
//!   Hamming matching and disparity scoring,
//! - [`overlay`]: visual verification images,
//! - [`synthetic`]: rendered test scenes.

use image::{ImageBuffer, Luma};

pub mod detect;
pub mod enhance;
pub mod features;
pub mod frame;
pub mod overlay;
pub mod quality;
pub mod rectify;
pub mod remap;
pub mod sample;
pub mod synthetic;

pub use detect::{detect_target, DetectorAttempt, DetectorConfig, SubpixConfig, TargetConfig, TargetDetection};
pub use enhance::BrightnessCompensation;
pub use features::{extract_features, match_features, FeatureConfig, FeatureMatch, Features, MatchConfig};
pub use frame::{split_equal_width, FrameError};
pub use quality::{judge_disparities, validate_pair, DisparityAxis, PairValidation, ValidationConfig};
pub use rectify::{stereo_rectify, BaselineAxis, RectifiedView, RectifyError, Roi, StereoRectification};
pub use remap::{remap_bilinear, RemapError, RemapTable};

/// Single-channel `f32` image.
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;
