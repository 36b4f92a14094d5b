//! Error types for compute API calls
//!
//! Failures from the provider are carried verbatim so the operator sees
//! exactly what the API said.

use moor_metadata::MetadataError;
use thiserror::Error;

/// Error type for compute API calls
#[derive(Debug, Error)]
pub enum CloudError {
    /// The provider client could not be started
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The provider rejected the call
    #[error("{operation} failed ({status}): {stderr}")]
    CallFailed {
        operation: String,
        status: String,
        stderr: String,
    },

    /// The response could not be understood
    #[error("unexpected {operation} response: {reason}")]
    Parse { operation: String, reason: String },

    /// Invalid identifier handed to the API layer
    #[error("invalid {kind}: {value:?}")]
    InvalidId { kind: &'static str, value: String },
}

/// Error type for elastic IP association
#[derive(Debug, Error)]
pub enum AddressError {
    /// Host name did not resolve to a usable IPv4 address
    #[error("cannot resolve {0} to an IPv4 address")]
    Resolution(String),

    /// Instance identity could not be determined
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The associate call failed
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// Result type for compute API calls
pub type Result<T> = std::result::Result<T, CloudError>;
