//! Moor Volume Attachment
//!
//! Attaches a block-storage volume to the running instance and mounts it,
//! safely repeatable. The pieces:
//!
//! - **DeviceAllocator**: picks a free `/dev/sdf`..`/dev/sdl` slot, checking
//!   both the kernel and the compute API
//! - **PollWait**: waits for the kernel to expose the device
//! - **MountGuard**: mounts exactly once, refusing conflicting mounts
//! - **VolumeAttacher**: runs the whole sequence
//!
//! Host access goes through the [`DeviceProbe`] and [`MountTable`] traits;
//! [`MemoryHost`] implements both for tests.
//!
//! # Example
//!
//! ```no_run
//! use moor_ec2::AwsCli;
//! use moor_metadata::{MetadataClient, MetadataConfig};
//! use moor_volume::{ProcMounts, SystemProbe, VolumeAttacher};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let metadata = Arc::new(MetadataClient::new(MetadataConfig::default())?);
//! let attacher = VolumeAttacher::new(
//!     metadata,
//!     Arc::new(AwsCli::new()),
//!     Arc::new(SystemProbe::new()),
//!     Arc::new(ProcMounts::new()),
//! );
//!
//! attacher
//!     .ensure_volume_attached("vol-0123456789abcdef0", "/mnt/data")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod attach;
pub mod config;
pub mod devices;
pub mod error;
pub mod memory;
pub mod mount;
pub mod target;
pub mod wait;

pub use attach::{AttachReport, AttachState, VolumeAttacher};
pub use config::AttachConfig;
pub use devices::{DeviceAllocator, DeviceProbe, SystemProbe, DEFAULT_CANDIDATES};
pub use error::{Result, VolumeError};
pub use memory::MemoryHost;
pub use mount::{MountGuard, MountOutcome, MountRecord, MountTable, ProcMounts};
pub use target::MountPoint;
pub use wait::PollWait;
