//! Metadata types
//!
//! Validated identifiers derived from the instance metadata service.

use crate::error::{MetadataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compute instance identifier (`i-` followed by lowercase hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Validate and wrap an instance id
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let valid = raw
            .strip_prefix("i-")
            .map(|hex| !hex.is_empty() && hex.bytes().all(is_lower_hex))
            .unwrap_or(false);

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(MetadataError::Identity(format!("invalid instance id: {:?}", raw)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cloud region name of the form `<letters>-<letters>-<digit>`, e.g. `us-west-2`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Region(String);

impl Region {
    /// Validate and wrap a region name
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split('-').collect();
        let valid = match parts.as_slice() {
            [area, direction, number] => {
                is_letters(area)
                    && is_letters(direction)
                    && number.len() == 1
                    && number.bytes().all(|b| b.is_ascii_digit())
            }
            _ => false,
        };

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(MetadataError::Identity(format!("invalid region: {:?}", raw)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

fn is_letters(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase())
}

macro_rules! string_newtype {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = MetadataError;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = MetadataError;

            fn try_from(s: String) -> Result<Self> {
                Self::parse(&s)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> String {
                value.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype!(InstanceId);
string_newtype!(Region);

/// Who this instance is and where it runs
///
/// Resolved once per [`MetadataClient`](crate::MetadataClient) and passed
/// explicitly to everything that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub instance_id: InstanceId,
    pub region: Region,
}

impl InstanceIdentity {
    pub fn new(instance_id: InstanceId, region: Region) -> Self {
        Self { instance_id, region }
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.instance_id, self.region)
    }
}

/// Subset of the instance identity document we read
///
/// The service returns many more fields; only `region` is required.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityDocument {
    pub region: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
}

impl IdentityDocument {
    /// Parse the raw document body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| MetadataError::Identity(format!("malformed identity document: {}", e)))
    }
}
