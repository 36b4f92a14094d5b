//! Error types for metadata access

use thiserror::Error;

/// Error type for metadata operations
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Local runtime directory could not be prepared
    #[error("environment error: {0}")]
    Environment(String),

    /// Metadata service unreachable or returned nothing usable
    #[error("metadata service unavailable: {0}")]
    Unavailable(String),

    /// Identity document or instance id did not validate
    #[error("identity error: {0}")]
    Identity(String),

    /// Absolute URL outside the metadata service
    #[error("refusing to send metadata token to untrusted url: {0}")]
    UntrustedUrl(String),
}

/// Result type for metadata operations
pub type Result<T> = std::result::Result<T, MetadataError>;

impl From<reqwest::Error> for MetadataError {
    fn from(err: reqwest::Error) -> Self {
        MetadataError::Unavailable(err.to_string())
    }
}
