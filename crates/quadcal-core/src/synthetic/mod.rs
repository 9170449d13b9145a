//! Deterministic synthetic data generation helpers.
//!
//! Building blocks for synthetic calibration problems used in tests and
//! demos:
//! - planar target point grids and board poses,
//! - a ground-truth four-camera rig producing a [`crate::CorrespondenceStore`],
//! - deterministic pseudo-random pixel noise.
//!
//! Everything here is seeded explicitly and produces stable point ordering.
//!
//! # Example
//!
//! ```
//! use quadcal_core::synthetic::{noise::UniformPixelNoise, rig::SyntheticRig};
//!
//! let rig = SyntheticRig::default();
//! let noise = UniformPixelNoise { seed: 7, max_abs_px: 0.2 };
//! let store = rig.generate_store(20, noise).unwrap();
//! assert_eq!(store.len(), 20);
//! ```

pub mod noise;
pub mod planar;
pub mod rig;
