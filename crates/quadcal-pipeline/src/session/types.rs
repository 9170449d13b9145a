//! Session metadata, audit log entries and export records.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// From [`ProblemType::name`](super::ProblemType::name).
    pub problem_type: String,
    pub schema_version: u32,
    /// Unix seconds.
    pub created_at: u64,
    /// Unix seconds.
    pub last_modified: u64,
    pub description: Option<String>,
}

impl SessionMetadata {
    pub fn new(problem_type: impl Into<String>, schema_version: u32) -> Self {
        let now = current_timestamp();
        Self {
            problem_type: problem_type.into(),
            schema_version,
            created_at: now,
            last_modified: now,
            description: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_modified = current_timestamp();
    }
}

/// One line of the session audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: u64,
    pub operation: String,
    pub success: bool,
    pub notes: Option<String>,
}

impl LogEntry {
    pub fn success(operation: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: true,
            notes: None,
        }
    }

    pub fn success_with_notes(operation: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Self::success(operation)
        }
    }

    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: false,
            notes: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord<E> {
    pub timestamp: u64,
    pub export: E,
    pub notes: Option<String>,
}

impl<E> ExportRecord<E> {
    pub fn new(export: E) -> Self {
        Self {
            timestamp: current_timestamp(),
            export,
            notes: None,
        }
    }
}

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
}

/// Unix time in seconds.
pub fn current_timestamp() -> u64 {
    since_epoch().as_secs()
}

/// Unix time in milliseconds; used for capture file names.
pub fn current_timestamp_ms() -> u128 {
    since_epoch().as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entries_record_outcome() {
        let ok = LogEntry::success_with_notes("intrinsics", "4 of 4 cameras");
        assert!(ok.success);
        assert_eq!(ok.notes.as_deref(), Some("4 of 4 cameras"));

        let err = LogEntry::failure("capture", "timed out");
        assert!(!err.success);
        assert!(err.timestamp > 0);
    }

    #[test]
    fn export_record_roundtrips() {
        let record = ExportRecord::new(vec![1.0, 2.0]);
        let json = serde_json::to_string(&record).unwrap();
        let back: ExportRecord<Vec<f64>> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.export, vec![1.0, 2.0]);
    }

    #[test]
    fn millisecond_clock_is_consistent_with_seconds() {
        let s = current_timestamp() as u128;
        let ms = current_timestamp_ms();
        assert!(ms / 1000 >= s && ms / 1000 <= s + 1);
    }
}
