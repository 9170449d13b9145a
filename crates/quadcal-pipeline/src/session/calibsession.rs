//! Session container holding one calibration run.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use super::problem_type::{InvalidationPolicy, ProblemType};
use super::types::{ExportRecord, LogEntry, SessionMetadata};

/// Mutable container for one calibration problem.
///
/// Only one final output is stored. Replacing the input invalidates
/// derived results according to [`ProblemType::on_input_change`]; config
/// changes follow [`ProblemType::on_config_change`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "P: ProblemType")]
pub struct CalibrationSession<P: ProblemType> {
    pub metadata: SessionMetadata,
    pub config: P::Config,
    input: Option<P::Input>,
    pub state: P::State,
    output: Option<P::Output>,
    pub exports: Vec<ExportRecord<P::Export>>,
    pub log: Vec<LogEntry>,
}

impl<P: ProblemType> Default for CalibrationSession<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ProblemType> CalibrationSession<P> {
    pub fn new() -> Self {
        Self {
            metadata: SessionMetadata::new(P::name(), P::schema_version()),
            config: P::Config::default(),
            input: None,
            state: P::State::default(),
            output: None,
            exports: Vec::new(),
            log: Vec::new(),
        }
    }

    pub fn with_description(description: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.metadata.description = Some(description.into());
        session
    }

    fn invalidate(&mut self, policy: InvalidationPolicy) {
        if policy.clear_state {
            self.state = P::State::default();
        }
        if policy.clear_output {
            self.output = None;
        }
        if policy.clear_exports {
            self.exports.clear();
        }
    }

    // Input

    /// # Errors
    ///
    /// Returns an error if [`ProblemType::validate_input`] rejects the input.
    pub fn set_input(&mut self, input: P::Input) -> Result<()> {
        P::validate_input(&input)?;
        self.invalidate(P::on_input_change());
        self.input = Some(input);
        self.metadata.touch();
        Ok(())
    }

    pub fn input(&self) -> Option<&P::Input> {
        self.input.as_ref()
    }

    /// # Errors
    ///
    /// Returns an error if no input has been set.
    pub fn require_input(&self) -> Result<&P::Input> {
        self.input.as_ref().ok_or_else(|| anyhow!("input not set"))
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    // Config

    /// # Errors
    ///
    /// Returns an error if [`ProblemType::validate_config`] rejects the config.
    pub fn set_config(&mut self, config: P::Config) -> Result<()> {
        P::validate_config(&config)?;
        self.invalidate(P::on_config_change());
        self.config = config;
        self.metadata.touch();
        Ok(())
    }

    /// Edit a copy of the config and apply it through [`Self::set_config`].
    ///
    /// # Errors
    ///
    /// Returns an error if the edited config fails validation.
    pub fn update_config<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut P::Config),
    {
        let mut config = self.config.clone();
        f(&mut config);
        self.set_config(config)
    }

    // Output

    pub fn output(&self) -> Option<&P::Output> {
        self.output.as_ref()
    }

    /// # Errors
    ///
    /// Returns an error if the output has not been computed.
    pub fn require_output(&self) -> Result<&P::Output> {
        self.output
            .as_ref()
            .ok_or_else(|| anyhow!("output not computed"))
    }

    pub fn set_output(&mut self, output: P::Output) {
        self.output = Some(output);
        self.metadata.touch();
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    // Export

    /// Convert the output and append it to [`Self::exports`].
    ///
    /// # Errors
    ///
    /// Returns an error if the output is missing or conversion fails.
    pub fn export(&mut self) -> Result<P::Export> {
        let export = self.export_peek()?;
        self.exports.push(ExportRecord::new(export.clone()));
        self.metadata.touch();
        Ok(export)
    }

    /// Convert the output without recording it.
    ///
    /// # Errors
    ///
    /// Returns an error if the output is missing or conversion fails.
    pub fn export_peek(&self) -> Result<P::Export> {
        P::export(self.require_output()?, &self.config)
    }

    /// # Errors
    ///
    /// Returns an error if input is missing or input/config validation fails.
    pub fn validate(&self) -> Result<()> {
        let input = self.require_input()?;
        P::validate_input(input)?;
        P::validate_config(&self.config)?;
        P::validate_input_config(input, &self.config)
    }

    // Log

    pub fn log_success(&mut self, operation: impl Into<String>) {
        self.log.push(LogEntry::success(operation));
        self.metadata.touch();
    }

    pub fn log_success_with_notes(
        &mut self,
        operation: impl Into<String>,
        notes: impl Into<String>,
    ) {
        self.log.push(LogEntry::success_with_notes(operation, notes));
        self.metadata.touch();
    }

    pub fn log_failure(&mut self, operation: impl Into<String>, error: impl Into<String>) {
        self.log.push(LogEntry::failure(operation, error));
        self.metadata.touch();
    }

    /// Clear state, output and exports; keep input and config.
    pub fn reset_computed(&mut self) {
        self.invalidate(InvalidationPolicy::CLEAR_ALL);
        self.metadata.touch();
    }

    // Persistence

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a session, rejecting files written for another problem type or
    /// schema version.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed JSON or metadata mismatch.
    pub fn from_json(json: &str) -> Result<Self> {
        let session: Self = serde_json::from_str(json)?;
        if session.metadata.problem_type != P::name() {
            bail!(
                "session problem type '{}' does not match '{}'",
                session.metadata.problem_type,
                P::name()
            );
        }
        if session.metadata.schema_version != P::schema_version() {
            bail!(
                "session schema version {} is not supported (expected {})",
                session.metadata.schema_version,
                P::schema_version()
            );
        }
        Ok(session)
    }
}
