//! Calibration session framework.
//!
//! A session is a mutable container holding configuration, input,
//! intermediate state and a single final output for one problem type.
//! Step functions take `&mut CalibrationSession<P>` and advance it.
//!
//! ```no_run
//! use quadcal_pipeline::session::CalibrationSession;
//! use quadcal_pipeline::quad_rig::{run_calibration, QuadRigInput, QuadRigProblem};
//! # fn main() -> anyhow::Result<()> {
//! # let input: QuadRigInput = unimplemented!();
//! let mut session = CalibrationSession::<QuadRigProblem>::new();
//! session.set_input(input)?;
//! run_calibration(&mut session)?;
//! let summary = session.export()?;
//! # Ok(())
//! # }
//! ```

pub mod calibsession;
pub mod problem_type;
pub mod types;

pub use calibsession::CalibrationSession;
pub use problem_type::{InvalidationPolicy, ProblemType};
pub use types::{current_timestamp, current_timestamp_ms, ExportRecord, LogEntry, SessionMetadata};
