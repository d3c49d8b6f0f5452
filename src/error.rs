//! Error types for fetching and ingesting course snapshots.

use thiserror::Error;

/// Failure to obtain a snapshot from the backend.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("response from {url} could not be decoded: {message}")]
    Decode { url: String, message: String },

    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Undecodable bodies will not fix themselves on a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Decode { .. })
    }
}

/// A single record that does not fit the declared data model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataShapeError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has invalid value {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("unrecognized quality label `{0}`")]
    UnknownLabel(String),

    #[error("unrecognized stage `{0}`")]
    UnknownStage(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}
