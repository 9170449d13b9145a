//! Non-linear refinement for the four-camera rig.
//!
//! - [`traits`]: the dense [`NllsProblem`] abstraction and solver options,
//! - [`backend_lm`]: Levenberg-Marquardt backend over `levenberg-marquardt`,
//! - [`planar_intrinsics`]: single-camera intrinsics + per-view poses,
//! - [`stereo_extrinsics`]: relative pose of two calibrated cameras,
//! - [`rig_refine`]: coordinate-descent refinement of all camera poses.

pub mod backend_lm;
pub mod params;
pub mod planar_intrinsics;
pub mod reprojection;
pub mod rig_refine;
pub mod stereo_extrinsics;
pub mod traits;

pub use backend_lm::LmBackend;
pub use planar_intrinsics::{calibrate_camera, PlanarIntrinsicsEstimate, PlanarIntrinsicsOptions};
pub use rig_refine::{refine_rig_poses, RefineConfig, RefineReport, RigRefineFrame};
pub use stereo_extrinsics::{calibrate_stereo_extrinsics, StereoEstimate, StereoOptions};
pub use traits::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
