//! Four-camera 2×2 rig calibration.
//!
//! [`QuadRigProblem`] plugs into [`CalibrationSession`](crate::session::CalibrationSession);
//! the step functions run the pipeline one stage at a time and
//! [`run_calibration`] chains them.

mod problem;
mod state;
mod steps;

pub use problem::{OverlayConfig, QuadRigConfig, QuadRigInput, QuadRigOutput, QuadRigProblem, SolverConfig};
pub use state::{CameraDistance, IntrinsicsSource, PairwisePose, QuadRigState, SkipReason, SpacingReport};
pub use steps::{
    centroid_poses, relative_pose, run_calibration, run_calibration_with_images, run_live_calibration,
    spacing_report, step_bundle_refine, step_finalize, step_intrinsics, step_pairwise_poses,
    step_rectification, step_reference_frame, step_validate, IntrinsicsOptions, PairwiseOptions,
    RefineOptions, ValidateOptions,
};
