//! Validated mount point

use crate::error::{Result, VolumeError};
use std::fmt;
use std::path::{Path, PathBuf};

/// Absolute directory path a volume is mounted at
///
/// Must be absolute, must not be `/`, and may not contain `.` or `..`
/// segments, whitespace or control characters. A trailing slash is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MountPoint(PathBuf);

impl MountPoint {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid =
            |why: &str| VolumeError::Usage(format!("invalid mount point {:?}: {}", raw, why));

        if !raw.starts_with('/') {
            return Err(invalid("must be an absolute path"));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid("contains whitespace or control characters"));
        }

        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(invalid("refusing to mount over /"));
        }
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(invalid("relative segments are not allowed"));
        }

        Ok(Self(PathBuf::from(format!("/{}", segments.join("/")))))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for MountPoint {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
