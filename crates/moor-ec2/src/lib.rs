//! Moor Compute API
//!
//! This crate wraps the handful of compute API calls moor needs: describing
//! an instance's block devices and volume attachments, attaching a volume,
//! and associating an elastic IP.
//!
//! # Backends
//!
//! - **AwsCli**: drives the provider's command-line client and parses its JSON
//! - **MemoryEc2**: in-memory state for tests
//!
//! # Example
//!
//! ```no_run
//! use moor_ec2::{AwsCli, Ec2Api, VolumeId};
//! use moor_metadata::{MetadataClient, MetadataConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let metadata = MetadataClient::new(MetadataConfig::default())?;
//! let identity = metadata.identity().await?;
//!
//! let ec2 = AwsCli::new();
//! let volume = VolumeId::parse("vol-0123456789abcdef0")?;
//! ec2.attach_volume(&identity, &volume, "/dev/sdf").await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod api;
pub mod cli;
pub mod error;
pub mod types;

pub use address::{AddressAssociator, HostResolver, SystemResolver};
pub use api::{Ec2Api, Ec2Call, MemoryEc2};
pub use cli::AwsCli;
pub use error::{AddressError, CloudError, Result};
pub use types::{VolumeAttachment, VolumeId};
