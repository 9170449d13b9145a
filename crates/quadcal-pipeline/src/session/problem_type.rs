//! The trait a calibration problem implements to live in a session.

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// What a session clears when its input or config is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvalidationPolicy {
    pub clear_state: bool,
    pub clear_output: bool,
    pub clear_exports: bool,
}

impl InvalidationPolicy {
    pub const KEEP_ALL: Self = Self {
        clear_state: false,
        clear_output: false,
        clear_exports: false,
    };

    /// Drop intermediate state and output, keep previous exports.
    pub const CLEAR_COMPUTED: Self = Self {
        clear_state: true,
        clear_output: true,
        clear_exports: false,
    };

    pub const CLEAR_ALL: Self = Self {
        clear_state: true,
        clear_output: true,
        clear_exports: true,
    };
}

/// Associated types and hooks of a calibration problem.
///
/// Problem behaviour lives in free step functions over
/// `&mut CalibrationSession<Self>`; the trait only names the data and
/// validates it.
pub trait ProblemType: Sized + 'static {
    type Config: Clone + Default + Serialize + DeserializeOwned + Debug;
    type Input: Clone + Serialize + DeserializeOwned + Debug;
    /// Per-step intermediate results.
    type State: Clone + Default + Serialize + DeserializeOwned + Debug;
    type Output: Clone + Serialize + DeserializeOwned + Debug;
    /// Form handed to downstream consumers.
    type Export: Clone + Serialize + DeserializeOwned + Debug;

    /// Stable snake_case identifier stored in session files.
    fn name() -> &'static str;

    /// Bump when any associated type changes its serialized form.
    fn schema_version() -> u32 {
        1
    }

    fn validate_input(_input: &Self::Input) -> Result<()> {
        Ok(())
    }

    fn validate_config(_config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn validate_input_config(_input: &Self::Input, _config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn on_input_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn on_config_change() -> InvalidationPolicy {
        InvalidationPolicy::KEEP_ALL
    }

    fn export(output: &Self::Output, config: &Self::Config) -> Result<Self::Export>;
}
