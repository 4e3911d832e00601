//! Pipeline error types and record validation helpers

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by ingestion, preprocessing, training and prediction
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unrecognized categorical value. Fatal: aborts the run.
    #[error("Schema error: race {race_id} horse {horse_id}: unrecognized {field} value {value:?}")]
    Schema {
        race_id: String,
        horse_id: String,
        field: &'static str,
        value: String,
    },

    /// Out-of-range or unparseable numeric/date field. The record is excluded.
    #[error("Data validation error: race {race_id} horse {horse_id}: {field} {reason}")]
    DataValidation {
        race_id: String,
        horse_id: String,
        field: &'static str,
        reason: String,
    },

    /// Empty or single-class training set
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// No model artifact at the given path
    #[error("Model not found: {}", .path.display())]
    ModelNotFound { path: PathBuf },

    /// Feature ordering or artifact format differs from this build
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersion { expected: String, found: String },

    /// Requested race is not part of the ingested data
    #[error("Race not found: {race_id}")]
    RaceNotFound { race_id: String },

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    /// Feed absent or unreachable. Sources with a fallback switch to it.
    #[error("Data feed unavailable: {0}")]
    FeedUnavailable(String),

    /// Feed present but unreadable (missing columns, broken CSV). Fatal.
    #[error("Data feed error: {0}")]
    Feed(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether the error only excludes a single record instead of aborting the run
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::DataValidation { .. })
    }

    /// Whether a fallback source may stand in for the failed one
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PipelineError::FeedUnavailable(_))
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Identifies the record being validated so errors carry race/horse context
#[derive(Debug, Clone, Copy)]
pub struct RecordContext<'a> {
    pub race_id: &'a str,
    pub horse_id: &'a str,
}

impl<'a> RecordContext<'a> {
    pub fn new(race_id: &'a str, horse_id: &'a str) -> Self {
        Self { race_id, horse_id }
    }

    pub fn invalid(&self, field: &'static str, reason: impl Into<String>) -> PipelineError {
        PipelineError::DataValidation {
            race_id: self.race_id.to_string(),
            horse_id: self.horse_id.to_string(),
            field,
            reason: reason.into(),
        }
    }

    pub fn unrecognized(&self, field: &'static str, value: &str) -> PipelineError {
        PipelineError::Schema {
            race_id: self.race_id.to_string(),
            horse_id: self.horse_id.to_string(),
            field,
            value: value.to_string(),
        }
    }
}

/// Validation functions
pub fn validate_positive(ctx: RecordContext<'_>, field: &'static str, value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ctx.invalid(field, format!("must be positive, got {}", value)));
    }
    Ok(value)
}

pub fn validate_at_least_one(ctx: RecordContext<'_>, field: &'static str, value: i64) -> Result<u32> {
    if value < 1 {
        return Err(ctx.invalid(field, format!("must be at least 1, got {}", value)));
    }
    u32::try_from(value).map_err(|_| ctx.invalid(field, format!("out of range: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RecordContext<'static> {
        RecordContext::new("20240001", "H1001")
    }

    #[test]
    fn test_validate_positive_valid() {
        assert!(validate_positive(ctx(), "win_odds", 1.1).is_ok());
        assert!(validate_positive(ctx(), "win_odds", 250.0).is_ok());
    }

    #[test]
    fn test_validate_positive_invalid() {
        assert!(validate_positive(ctx(), "win_odds", 0.0).is_err());
        assert!(validate_positive(ctx(), "win_odds", -3.0).is_err());
        assert!(validate_positive(ctx(), "win_odds", f64::NAN).is_err());
    }

    #[test]
    fn test_validate_at_least_one() {
        assert_eq!(validate_at_least_one(ctx(), "post_position", 1).unwrap(), 1);
        assert!(validate_at_least_one(ctx(), "post_position", 0).is_err());
        assert!(validate_at_least_one(ctx(), "post_position", -2).is_err());
    }

    #[test]
    fn test_validation_error_is_recoverable() {
        let err = validate_positive(ctx(), "horse_weight", 0.0).unwrap_err();
        assert!(err.is_recoverable());
        assert!(!ctx().unrecognized("sex", "X").is_recoverable());
    }

    #[test]
    fn test_error_display_carries_ids() {
        let err = ctx().unrecognized("track_type", "sand");
        let msg = err.to_string();
        assert!(msg.contains("Schema error"));
        assert!(msg.contains("20240001"));
        assert!(msg.contains("H1001"));
        assert!(msg.contains("sand"));
    }
}
