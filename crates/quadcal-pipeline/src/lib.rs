//! Calibration pipeline for a four-camera 2×2 rig.
//!
//! Captures synchronized frames from a combined four-view sensor, solves
//! per-camera intrinsics and the rig geometry, builds rectification maps
//! for neighbouring pairs and checks them on a held-out frame.
//!
//! ## Session API
//!
//! ```no_run
//! use quadcal_pipeline::session::CalibrationSession;
//! use quadcal_pipeline::quad_rig::{run_calibration, QuadRigInput, QuadRigProblem};
//! # fn main() -> anyhow::Result<()> {
//! # let input: QuadRigInput = unimplemented!();
//!
//! let mut session = CalibrationSession::<QuadRigProblem>::new();
//! session.set_input(input)?;
//! run_calibration(&mut session)?;
//!
//! quadcal_pipeline::artifacts::write_artifacts(&mut session, "calibration_maps".as_ref(), None)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Live capture
//!
//! With hardware behind a [`FrameSource`](hardware::FrameSource), wrap it
//! in a [`SharedCamera`](reconfigure::SharedCamera) and call
//! [`quad_rig::run_live_calibration`]. Every camera operation is bounded
//! by a timeout and only one may be in flight per camera.

// Core session framework
pub mod session;

pub mod artifacts;
pub mod capture;
pub mod hardware;
pub mod highres;
pub mod quad_rig;
pub mod reconfigure;
pub mod retry;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::session::{
    CalibrationSession, ExportRecord, InvalidationPolicy, LogEntry, ProblemType, SessionMetadata,
};

pub use crate::quad_rig::{
    run_calibration, run_live_calibration, QuadRigConfig, QuadRigInput, QuadRigOutput, QuadRigProblem,
};

pub use crate::artifacts::{write_artifacts, CalibrationSummary, ValidationReport};
pub use crate::capture::{capture_calibration_frames, CaptureConfig, CaptureError};
pub use crate::hardware::{FixedSettings, FrameSource, HardwareError, Settings, SettingsProvider};
pub use crate::reconfigure::SharedCamera;
pub use crate::retry::{attempt, RetryError, RetryPolicy};
