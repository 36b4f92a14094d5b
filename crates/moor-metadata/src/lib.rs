//! Moor Metadata Client
//!
//! This crate talks to the instance metadata service at the well-known
//! address `169.254.169.254` to find out which instance it is running on.
//!
//! # Overview
//!
//! Every request needs a session token. Tokens are issued with a `PUT` and
//! cached in a per-user runtime directory so that repeated invocations of the
//! tool do not pay for a new one each time. The cache file is replaced
//! atomically, which keeps concurrent invocations safe without locking.
//!
//! # Example
//!
//! ```no_run
//! use moor_metadata::{MetadataClient, MetadataConfig};
//!
//! # async fn example() -> moor_metadata::Result<()> {
//! let client = MetadataClient::new(MetadataConfig::default())?;
//!
//! // Raw documents by path
//! let hostname = client.fetch_text("latest/meta-data/hostname").await?;
//!
//! // Validated identity, cached on the client
//! let identity = client.identity().await?;
//! println!("{} in {}", identity.instance_id, identity.region);
//! # Ok(())
//! # }
//! ```
//!
//! # Paths Used
//!
//! - `PUT /latest/api/token` - Issue a session token
//! - `/latest/meta-data/instance-id` - Instance identifier
//! - `/latest/dynamic/instance-identity/document` - Identity JSON (region)

pub mod client;
pub mod config;
pub mod error;
pub mod token;
pub mod types;

pub use client::MetadataClient;
pub use config::MetadataConfig;
pub use error::{MetadataError, Result};
pub use token::{MetadataToken, TokenCache};
pub use types::{InstanceId, InstanceIdentity, Region};
