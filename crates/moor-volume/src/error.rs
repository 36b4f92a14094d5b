//! Error types for volume attachment

use moor_ec2::CloudError;
use moor_metadata::MetadataError;
use std::time::Duration;
use thiserror::Error;

/// Error type for volume operations
#[derive(Debug, Error)]
pub enum VolumeError {
    /// Bad arguments, detected before anything touches the network
    #[error("usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// A describe call failed
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// The attach-volume call failed
    #[error("attach failed: {0}")]
    Attach(#[source] CloudError),

    /// Every candidate device is in use
    #[error("no free device among {0}")]
    NoDeviceAvailable(String),

    /// Mount point or device is not what it should be
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Something else is mounted where we want to be, or our device is mounted elsewhere
    #[error("mount conflict: {0}")]
    MountConflict(String),

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("cancelled while waiting for {0}")]
    Cancelled(String),

    /// Reading kernel or mount state failed
    #[error("host inspection failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for volume operations
pub type Result<T> = std::result::Result<T, VolumeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VolumeError::Usage("invalid volume id: \"vol-123\"".to_string());
        assert_eq!(err.to_string(), "usage error: invalid volume id: \"vol-123\"");

        let err = VolumeError::Timeout {
            what: "/dev/sdf".to_string(),
            waited: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "timed out after 30s waiting for /dev/sdf");

        let err = VolumeError::NoDeviceAvailable("/dev/sdf../dev/sdl".to_string());
        assert_eq!(err.to_string(), "no free device among /dev/sdf../dev/sdl");
    }

    #[test]
    fn test_attach_error_keeps_provider_message() {
        let err = VolumeError::Attach(CloudError::CallFailed {
            operation: "attach-volume".to_string(),
            status: "exit status: 254".to_string(),
            stderr: "IncorrectState".to_string(),
        });
        assert!(err.to_string().starts_with("attach failed: attach-volume failed"));
        assert!(err.to_string().ends_with("IncorrectState"));
    }
}
