//! Validation and submission errors.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    InvalidResourceCombination,
    LimitExceeded,
    Malformed,
}

/// A resource request that cannot become a job. Nothing was started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid resource request: {reason}")]
    InvalidResourceCombination { reason: String },
    #[error("Requested {resource} {requested} exceeds the cluster maximum of {maximum}")]
    LimitExceeded {
        resource: &'static str,
        requested: String,
        maximum: String,
    },
    #[error("Cannot parse {field} '{value}'")]
    Malformed { field: &'static str, value: String },
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            Self::InvalidResourceCombination { .. } => {
                ValidationErrorKind::InvalidResourceCombination
            }
            Self::LimitExceeded { .. } => ValidationErrorKind::LimitExceeded,
            Self::Malformed { .. } => ValidationErrorKind::Malformed,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidResourceCombination {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionErrorKind {
    ExternalToolUnavailable,
    AllocationDenied,
    QueueRejected,
}

/// A submission that did not reach the queue or was refused by it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("{tool} is not available: {detail}")]
    ExternalToolUnavailable { tool: String, detail: String },
    #[error("Allocation denied: {diagnostic}")]
    AllocationDenied { diagnostic: String },
    #[error("Job rejected by the batch queue: {diagnostic}")]
    QueueRejected { diagnostic: String },
}

impl SubmissionError {
    pub fn kind(&self) -> SubmissionErrorKind {
        match self {
            Self::ExternalToolUnavailable { .. } => SubmissionErrorKind::ExternalToolUnavailable,
            Self::AllocationDenied { .. } => SubmissionErrorKind::AllocationDenied,
            Self::QueueRejected { .. } => SubmissionErrorKind::QueueRejected,
        }
    }
}
