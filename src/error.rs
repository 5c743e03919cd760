//! Error types for Synheart Trends
//!
//! Missing or malformed values are not errors anywhere in the engine; they
//! travel through the pipeline as `None`. The variants below cover the
//! integration boundary (unparsable input, bad configuration) and caller
//! precondition violations.

use thiserror::Error;

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse source payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Precondition violated: {0}")]
    Precondition(String),
}
