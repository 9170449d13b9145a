//! Linear (closed-form) calibration initializers.
//!
//! Everything here is meant to seed the non-linear refinements in
//! `quadcal-optim`:
//!
//! - [`dlt_homography`]: normalized DLT plane-to-image homography,
//! - [`estimate_intrinsics_from_homographies`]: Zhang's closed form,
//! - [`estimate_distortion_from_homographies`]: linear Brown-Conrady fit,
//! - [`estimate_intrinsics_iterative`]: alternating K / distortion init,
//! - [`estimate_planar_pose_from_h`]: board pose from a homography,
//! - [`average_isometries`]: quaternion-hemisphere SE(3) averaging.

pub mod distortion_fit;
pub mod homography;
pub mod iterative_intrinsics;
pub mod math;
pub mod planar_pose;
pub mod pose_average;
pub mod zhang_intrinsics;

pub use distortion_fit::{
    estimate_distortion_from_homographies, DistortionFitError, DistortionFitOptions, DistortionView,
};
pub use homography::{dlt_homography, HomographyError};
pub use iterative_intrinsics::{
    estimate_intrinsics_iterative, IterativeIntrinsicsError, IterativeIntrinsicsOptions,
    IterativeIntrinsicsResult,
};
pub use planar_pose::{estimate_planar_pose_from_h, estimate_view_pose, PlanarPoseError};
pub use pose_average::average_isometries;
pub use zhang_intrinsics::{estimate_intrinsics_from_homographies, ZhangError};

/// Convenience re-exports for step code.
pub mod prelude {
    pub use crate::{
        average_isometries, dlt_homography, estimate_distortion_from_homographies,
        estimate_intrinsics_from_homographies, estimate_intrinsics_iterative,
        estimate_planar_pose_from_h, estimate_view_pose, DistortionFitOptions, IterativeIntrinsicsOptions,
    };
}
