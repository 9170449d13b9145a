//! Observation and calibration data types.

mod frame;
mod observation;
mod rig;

pub use frame::{CalibrationFrame, CorrespondenceStore, NUM_CAMERAS};
pub use observation::{CorrespondenceView, ReprojectionStats};
pub use rig::{CameraIntrinsics, CameraPair, CameraPose, ImageSize, RigLayout};
