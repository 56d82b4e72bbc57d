//! Common error types for WJS
//!
//! One taxonomy shared by the gateway contract, the aggregator, and the
//! reconciler so that every failure surfaced to the store carries the same
//! shape. Errors are cloneable because the latest failure is kept in the
//! tournament snapshot for observers.

use thiserror::Error;

use crate::models::JudgeCode;

/// Common result type for WJS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy across the WJS coordinator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Transport-level failure or request timeout; retryable by user action
    #[error("Network error: {0}")]
    Network(String),

    /// Bearer credential rejected; cached token has been invalidated.
    /// Requires re-authentication, never retried automatically.
    #[error("Authentication expired")]
    AuthExpired,

    /// Response decode failure (non-numeric score string, unknown judge
    /// code). Treated as data corruption: surfaced, not retried.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Scoring workflow precondition not met; names the absent judges
    #[error("Missing judges: {}", join_judges(.0))]
    MissingJudges(Vec<JudgeCode>),

    /// Locally rejected intent (e.g. same participant proposed as both
    /// active and on-deck); no network call was made
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation invoked in the wrong session phase
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A duplicate of this operation is already outstanding
    #[error("Operation in flight: {0}")]
    InFlight(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Live event channel failure
    #[error("Event channel error: {0}")]
    Channel(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_judges(judges: &[JudgeCode]) -> String {
    judges
        .iter()
        .map(JudgeCode::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
