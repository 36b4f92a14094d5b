//! Compute API types

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Block-storage volume identifier: `vol-` followed by 8 to 17 lowercase hex digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeId(String);

impl VolumeId {
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = raw
            .strip_prefix("vol-")
            .map(|hex| {
                (8..=17).contains(&hex.len())
                    && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
            })
            .unwrap_or(false);

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(CloudError::InvalidId {
                kind: "volume id",
                value: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VolumeId {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VolumeId {
    type Error = CloudError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<VolumeId> for String {
    fn from(value: VolumeId) -> String {
        value.0
    }
}

/// A volume attachment as reported by the compute API
///
/// The device is the name the API was given at attach time; the kernel may
/// expose the disk under a different name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub volume_id: String,
    pub instance_id: String,
    pub device: String,
    pub state: Option<String>,
}

impl VolumeAttachment {
    pub fn new(
        volume_id: impl Into<String>,
        instance_id: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            volume_id: volume_id.into(),
            instance_id: instance_id.into(),
            device: device.into(),
            state: None,
        }
    }

    /// Set the attachment state (`attaching`, `attached`, ...)
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}
