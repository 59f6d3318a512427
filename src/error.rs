//! Error handling.

use serde::{Deserialize, Serialize};
use std::error::Error;
use strum_macros::Display;
use thiserror::Error;
use tracing::{event, Level};

/// Rechunking error type
///
/// This type encapsulates the various errors that may occur while addressing, splitting,
/// consolidating or planning chunks. Each variant maps onto an [ErrorCode].
#[derive(Debug, Error)]
pub enum RechunkError {
    /// Malformed keys, chunk lengths or dataset sizes
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Chunks that do not form a consistent, gap-free, non-overlapping tiling
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// A chunk or stage would exceed the memory budget
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Error validating a planner configuration
    #[error("planner configuration is not valid")]
    InvalidConfig(#[from] validator::ValidationErrors),

    /// Error encoding or decoding a key
    #[error("failed to (de)serialise key")]
    KeySerialization(#[from] serde_json::Error),

    /// Error creating an ndarray array from a shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ndarray::ShapeError),

    /// Error building the worker thread pool
    #[error("failed to build worker thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl RechunkError {
    /// Returns a new [RechunkError::InvalidArgument].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Returns a new [RechunkError::FailedPrecondition].
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    /// Returns a new [RechunkError::ResourceExhausted].
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted(message.into())
    }

    /// Returns the [ErrorCode] classifying this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            RechunkError::InvalidArgument(_)
            | RechunkError::InvalidConfig(_)
            | RechunkError::KeySerialization(_) => ErrorCode::InvalidArgument,

            RechunkError::FailedPrecondition(_) | RechunkError::ShapeInvalid(_) => {
                ErrorCode::FailedPrecondition
            }

            RechunkError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,

            RechunkError::ThreadPool(_) => ErrorCode::Internal,
        }
    }
}

/// Classification of errors, independent of their cause.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidArgument,
    FailedPrecondition,
    ResourceExhausted,
    Internal,
}

/// Structured rendering of an error
///
/// Implements serde (de)serialise.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorReport {
    /// Error classification
    pub code: ErrorCode,

    /// Main error message
    pub message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<Vec<String>>,
}

impl ErrorReport {
    /// Return a new ErrorReport
    ///
    /// # Arguments
    ///
    /// * `code`: Classification of the error
    /// * `error`: The error that occurred
    fn new<E>(code: ErrorCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorReport {
            code,
            message,
            caused_by,
        }
    }
}

impl From<RechunkError> for ErrorReport {
    /// Convert from a `RechunkError` into an `ErrorReport`.
    fn from(error: RechunkError) -> Self {
        let report = ErrorReport::new(error.code(), &error);

        // Log internal errors.
        if report.code == ErrorCode::Internal {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_rechunk_error(
        error: RechunkError,
        code: ErrorCode,
        message: &str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let report = ErrorReport::from(error);
        assert_eq!(code, report.code);
        assert_eq!(message.to_string(), report.message);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, report.caused_by);
    }

    #[test]
    fn invalid_argument_error() {
        let error = RechunkError::invalid_argument("chunk length for x must be positive");
        let message = "invalid argument: chunk length for x must be positive";
        test_rechunk_error(error, ErrorCode::InvalidArgument, message, None);
    }

    #[test]
    fn failed_precondition_error() {
        let error = RechunkError::failed_precondition("overlap");
        test_rechunk_error(
            error,
            ErrorCode::FailedPrecondition,
            "failed precondition: overlap",
            None,
        );
    }

    #[test]
    fn resource_exhausted_error() {
        let error = RechunkError::resource_exhausted("too big");
        test_rechunk_error(
            error,
            ErrorCode::ResourceExhausted,
            "resource exhausted: too big",
            None,
        );
    }

    #[test]
    fn invalid_config_error() {
        let mut validation_errors = validator::ValidationErrors::new();
        let validation_error = validator::ValidationError::new("foo");
        validation_errors.add("max_stages", validation_error);
        let error = RechunkError::InvalidConfig(validation_errors);
        let message = "planner configuration is not valid";
        let caused_by = Some(vec!["max_stages: Validation error: foo [{}]"]);
        test_rechunk_error(error, ErrorCode::InvalidArgument, message, caused_by);
    }

    #[test]
    fn key_serialization_error() {
        let json_error = serde_json::from_str::<u32>("x").unwrap_err();
        let error = RechunkError::KeySerialization(json_error);
        let message = "failed to (de)serialise key";
        let caused_by = Some(vec!["expected value at line 1 column 1"]);
        test_rechunk_error(error, ErrorCode::InvalidArgument, message, caused_by);
    }

    #[test]
    fn shape_error() {
        let error = RechunkError::ShapeInvalid(ndarray::ShapeError::from_kind(
            ndarray::ErrorKind::OutOfBounds,
        ));
        let message = "failed to create array from shape";
        let caused_by = Some(vec!["ShapeError/OutOfBounds: out of bounds indexing"]);
        test_rechunk_error(error, ErrorCode::FailedPrecondition, message, caused_by);
    }

    #[test]
    fn error_report_serialises_without_causes() {
        let report = ErrorReport::from(RechunkError::failed_precondition("gap"));
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(
            r#"{"code":"failed_precondition","message":"failed precondition: gap"}"#,
            json
        );
    }
}
