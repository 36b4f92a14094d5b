//! Volume attachment state machine
//!
//! ```text
//! Unvalidated -> Identified -> AttachmentResolved -> DeviceVisible -> Mounted
//!       \______________\_______________\___________________\___> Failed
//! ```
//!
//! Arguments are validated before anything touches the network. Nothing is
//! rolled back on failure: a volume that attached but did not mount stays
//! attached, and the next run picks it up from the attachment list.

use crate::config::AttachConfig;
use crate::devices::{visible_device, DeviceAllocator, DeviceProbe};
use crate::error::{Result, VolumeError};
use crate::mount::{MountGuard, MountOutcome, MountTable};
use crate::target::MountPoint;
use crate::wait::PollWait;
use moor_ec2::{Ec2Api, VolumeId};
use moor_metadata::MetadataClient;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachState {
    Unvalidated,
    Identified,
    AttachmentResolved,
    DeviceVisible,
    Mounted,
    Failed(String),
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachState::Unvalidated => write!(f, "unvalidated"),
            AttachState::Identified => write!(f, "identified"),
            AttachState::AttachmentResolved => write!(f, "attachment-resolved"),
            AttachState::DeviceVisible => write!(f, "device-visible"),
            AttachState::Mounted => write!(f, "mounted"),
            AttachState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachReport {
    pub volume: VolumeId,
    pub mount_point: MountPoint,
    /// Device name as the compute API knows it
    pub device: String,
    /// Device path the kernel exposes
    pub visible_device: PathBuf,
    /// Whether this run issued the attach call
    pub attached: bool,
    pub outcome: MountOutcome,
}

fn advance(state: &mut AttachState, next: AttachState, volume: &str) {
    match &next {
        AttachState::Failed(_) => warn!(volume = %volume, from = %state, "Attachment {}", next),
        _ => info!(volume = %volume, from = %state, to = %next, "Attachment state changed"),
    }
    *state = next;
}

/// Attaches a volume to this instance and mounts it
pub struct VolumeAttacher {
    metadata: Arc<MetadataClient>,
    ec2: Arc<dyn Ec2Api>,
    probe: Arc<dyn DeviceProbe>,
    mounts: Arc<dyn MountTable>,
    config: AttachConfig,
    cancel: CancellationToken,
}

impl VolumeAttacher {
    pub fn new(
        metadata: Arc<MetadataClient>,
        ec2: Arc<dyn Ec2Api>,
        probe: Arc<dyn DeviceProbe>,
        mounts: Arc<dyn MountTable>,
    ) -> Self {
        Self {
            metadata,
            ec2,
            probe,
            mounts,
            config: AttachConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: AttachConfig) -> Self {
        self.config = config;
        self
    }

    /// Token that aborts the run once arguments are validated
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Make sure `volume_id` is attached here and mounted at `mount_point`
    ///
    /// Safe to repeat: once the volume is attached and mounted, further
    /// calls make no attach or mount calls.
    pub async fn ensure_volume_attached(
        &self,
        volume_id: &str,
        mount_point: &str,
    ) -> Result<AttachReport> {
        let mut state = AttachState::Unvalidated;

        let result = self.run(volume_id, mount_point, &mut state).await;
        if let Err(e) = &result {
            advance(&mut state, AttachState::Failed(e.to_string()), volume_id);
        }

        result
    }

    async fn run(
        &self,
        volume_id: &str,
        mount_point: &str,
        state: &mut AttachState,
    ) -> Result<AttachReport> {
        let volume = VolumeId::parse(volume_id).map_err(|e| VolumeError::Usage(e.to_string()))?;
        let mount_point = MountPoint::parse(mount_point)?;

        if !self.probe.is_dir(mount_point.as_path()) {
            self.probe.create_dir_all(mount_point.as_path()).map_err(|e| {
                VolumeError::InvalidTarget(format!("cannot create {}: {}", mount_point, e))
            })?;
            info!(mount_point = %mount_point, "Created mount point");
        }
        advance(state, AttachState::Identified, volume.as_str());

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(VolumeError::Cancelled(format!("attachment of {}", volume)))
            }
            result = self.attach_and_mount(volume.clone(), mount_point, state) => result,
        }
    }

    async fn attach_and_mount(
        &self,
        volume: VolumeId,
        mount_point: MountPoint,
        state: &mut AttachState,
    ) -> Result<AttachReport> {
        let identity = self.metadata.identity().await?;

        let attachments = self.ec2.volume_attachments(&identity).await?;
        let existing = attachments
            .into_iter()
            .find(|a| a.volume_id == volume.as_str());

        let (device, attached) = match existing {
            Some(attachment) => {
                info!(volume = %volume, device = %attachment.device, "Volume already attached");
                (attachment.device, false)
            }
            None => {
                let device = DeviceAllocator::new(self.probe.clone(), self.ec2.clone())
                    .with_candidates(self.config.candidates.clone())
                    .next_free_device(&identity)
                    .await?;
                self.ec2
                    .attach_volume(&identity, &volume, &device)
                    .await
                    .map_err(VolumeError::Attach)?;
                (device, true)
            }
        };
        advance(state, AttachState::AttachmentResolved, volume.as_str());

        let probe = self.probe.as_ref();
        let visible = PollWait::new(self.config.poll_interval)
            .with_deadline(self.config.device_timeout)
            .with_cancellation(self.cancel.clone())
            .until(&device, || Ok(visible_device(probe, &device)?))
            .await?;
        info!(volume = %volume, device = %visible.display(), "Device visible");
        advance(state, AttachState::DeviceVisible, volume.as_str());

        let outcome = MountGuard::new(self.probe.clone(), self.mounts.clone())
            .ensure_mounted(&visible, mount_point.as_path())
            .await?;
        advance(state, AttachState::Mounted, volume.as_str());

        Ok(AttachReport {
            volume,
            mount_point,
            device,
            visible_device: visible,
            attached,
            outcome,
        })
    }
}
