use std::path::PathBuf;

use thiserror::Error;

use crate::config::StageKind;

/// Main error type for the SimForge system
#[derive(Error, Debug)]
pub enum SfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),

    #[error("Event log error: {0}")]
    Log(#[from] LogError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors detected while validating a configuration, before any trial runs.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Invalid range for {parameter}: low {low} > high {high}")]
    InvalidRange {
        parameter: String,
        low: f64,
        high: f64,
    },

    #[error("Bounds for {parameter} must be finite")]
    NonFiniteBound { parameter: String },

    #[error("Empty choice list for {parameter}")]
    EmptyChoices { parameter: String },

    #[error("Duplicate search dimension: {parameter}")]
    DuplicateParameter { parameter: String },

    #[error("Unknown search parameter: {parameter}")]
    UnknownParameter { parameter: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Event-log loading and validation errors.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Log file not found: {0}")]
    NotFound(PathBuf),

    #[error("Missing column '{column}' in {path}")]
    MissingColumn { column: String, path: PathBuf },

    #[error("Cannot parse timestamp '{value}' at row {row}: timestamps must be timezone-aware")]
    Timestamp { value: String, row: usize },

    #[error("Record {row} of case {case_id} starts after it ends")]
    StartAfterEnd { case_id: String, row: usize },

    #[error("Event log is empty: {0}")]
    Empty(PathBuf),

    #[error("Malformed row {row}: {message}")]
    MalformedRow { row: usize, message: String },

    #[error("Failed to write log {path}: {message}")]
    Write { path: PathBuf, message: String },
}

/// An external tool (miner, simulator) returned an unexpected result.
///
/// These are contained at the trial level and never crash a stage.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("{tool} did not produce the expected output file {path}")]
    MissingOutput { tool: String, path: PathBuf },

    #[error("{tool} exited with {status}")]
    ToolFailed { tool: String, status: String },

    #[error("Failed to launch {tool}: {message}")]
    LaunchFailed { tool: String, message: String },

    #[error("{tool} produced malformed output: {message}")]
    MalformedOutput { tool: String, message: String },
}

/// Pipeline-level failures that terminate a run with no bundle.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(
        "No viable trial in stage {stage}: {failed} of {total} evaluations failed"
    )]
    NoViableTrial {
        stage: StageKind,
        failed: usize,
        total: usize,
    },
}

/// Result type alias for SimForge operations
pub type SfResult<T> = Result<T, SfError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::SfError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_viable_trial_reports_stage_and_tally() {
        let error = PipelineError::NoViableTrial {
            stage: StageKind::Calendars,
            failed: 7,
            total: 7,
        };

        let rendered = error.to_string();
        assert!(rendered.contains("calendars"));
        assert!(rendered.contains("7 of 7"));
    }

    #[test]
    fn error_conversion() {
        let config_error = ConfigurationError::EmptyChoices {
            parameter: "gateway_probabilities".to_string(),
        };
        let sf_error: SfError = config_error.into();

        match sf_error {
            SfError::Config(_) => (),
            _ => panic!("Expected Config error"),
        }
    }

    #[test]
    fn collaborator_error_display() {
        let error = CollaboratorError::MissingOutput {
            tool: "split-miner".to_string(),
            path: PathBuf::from("/tmp/model.bpmn"),
        };
        assert!(error.to_string().contains("split-miner"));
        assert!(error.to_string().contains("model.bpmn"));
    }
}
