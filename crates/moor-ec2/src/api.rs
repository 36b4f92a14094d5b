//! Compute API trait
//!
//! The calls this tool makes against the provider's compute API. The
//! production implementation lives in [`crate::cli`]; [`MemoryEc2`] keeps
//! everything in memory for tests.

use crate::error::{CloudError, Result};
use crate::types::{VolumeAttachment, VolumeId};
use async_trait::async_trait;
use moor_metadata::InstanceIdentity;
use std::net::Ipv4Addr;
use std::sync::RwLock;

/// Compute API operations used by moor
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// Device names of every block-device mapping on the instance
    ///
    /// This is what the API believes is attached, which may run ahead of
    /// what the kernel has discovered.
    async fn block_device_names(&self, identity: &InstanceIdentity) -> Result<Vec<String>>;

    /// All volume attachments that reference the instance
    async fn volume_attachments(
        &self,
        identity: &InstanceIdentity,
    ) -> Result<Vec<VolumeAttachment>>;

    /// Attach a volume to the instance under the given device name
    async fn attach_volume(
        &self,
        identity: &InstanceIdentity,
        volume: &VolumeId,
        device: &str,
    ) -> Result<()>;

    /// Associate a public address with the instance
    async fn associate_address(&self, identity: &InstanceIdentity, address: Ipv4Addr) -> Result<()>;
}

/// Record of a mutating call made against [`MemoryEc2`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ec2Call {
    AttachVolume {
        instance: String,
        volume: String,
        device: String,
    },
    AssociateAddress {
        instance: String,
        address: Ipv4Addr,
    },
}

#[derive(Debug, Default)]
struct MemoryState {
    block_devices: Vec<(String, String)>,
    attachments: Vec<VolumeAttachment>,
    calls: Vec<Ec2Call>,
    describe_calls: usize,
    attach_error: Option<String>,
}

/// In-memory compute API for testing
#[derive(Debug, Default)]
pub struct MemoryEc2 {
    state: RwLock<MemoryState>,
}

impl MemoryEc2 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block-device mapping for an instance
    pub fn with_block_device(self, instance: &str, device: &str) -> Self {
        self.state
            .write()
            .unwrap()
            .block_devices
            .push((instance.to_string(), device.to_string()));
        self
    }

    /// Add an existing volume attachment (also registers its block device)
    pub fn with_attachment(self, attachment: VolumeAttachment) -> Self {
        let this = self.with_block_device(&attachment.instance_id, &attachment.device);
        this.state.write().unwrap().attachments.push(attachment);
        this
    }

    /// Make every attach call fail with this message
    pub fn with_attach_error(self, message: impl Into<String>) -> Self {
        self.state.write().unwrap().attach_error = Some(message.into());
        self
    }

    /// Mutating calls made so far
    pub fn calls(&self) -> Vec<Ec2Call> {
        self.state.read().unwrap().calls.clone()
    }

    /// Number of describe calls made so far
    pub fn describe_calls(&self) -> usize {
        self.state.read().unwrap().describe_calls
    }
}

#[async_trait]
impl Ec2Api for MemoryEc2 {
    async fn block_device_names(&self, identity: &InstanceIdentity) -> Result<Vec<String>> {
        let mut state = self.state.write().unwrap();
        state.describe_calls += 1;
        Ok(state
            .block_devices
            .iter()
            .filter(|(instance, _)| instance == identity.instance_id.as_str())
            .map(|(_, device)| device.clone())
            .collect())
    }

    async fn volume_attachments(
        &self,
        identity: &InstanceIdentity,
    ) -> Result<Vec<VolumeAttachment>> {
        let mut state = self.state.write().unwrap();
        state.describe_calls += 1;
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.instance_id == identity.instance_id.as_str())
            .cloned()
            .collect())
    }

    async fn attach_volume(
        &self,
        identity: &InstanceIdentity,
        volume: &VolumeId,
        device: &str,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.calls.push(Ec2Call::AttachVolume {
            instance: identity.instance_id.to_string(),
            volume: volume.to_string(),
            device: device.to_string(),
        });

        if let Some(message) = &state.attach_error {
            return Err(CloudError::CallFailed {
                operation: "attach-volume".to_string(),
                status: "exit status: 254".to_string(),
                stderr: message.clone(),
            });
        }

        state
            .block_devices
            .push((identity.instance_id.to_string(), device.to_string()));
        state.attachments.push(
            VolumeAttachment::new(volume.as_str(), identity.instance_id.as_str(), device)
                .with_state("attaching"),
        );
        Ok(())
    }

    async fn associate_address(
        &self,
        identity: &InstanceIdentity,
        address: Ipv4Addr,
    ) -> Result<()> {
        self.state.write().unwrap().calls.push(Ec2Call::AssociateAddress {
            instance: identity.instance_id.to_string(),
            address,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moor_metadata::{InstanceId, Region};

    fn identity(id: &str) -> InstanceIdentity {
        InstanceIdentity::new(InstanceId::parse(id).unwrap(), Region::parse("us-west-2").unwrap())
    }

    #[tokio::test]
    async fn test_memory_filters_by_instance() {
        let ec2 = MemoryEc2::new()
            .with_block_device("i-aaa", "/dev/xvda")
            .with_block_device("i-bbb", "/dev/sdf")
            .with_attachment(VolumeAttachment::new("vol-12345678", "i-aaa", "/dev/sdg"));

        let devices = ec2.block_device_names(&identity("i-aaa")).await.unwrap();
        assert_eq!(devices, vec!["/dev/xvda", "/dev/sdg"]);

        let attachments = ec2.volume_attachments(&identity("i-bbb")).await.unwrap();
        assert!(attachments.is_empty());
        assert_eq!(ec2.describe_calls(), 2);
    }

    #[tokio::test]
    async fn test_memory_attach_records_call() {
        let ec2 = MemoryEc2::new();
        let volume = VolumeId::parse("vol-12345678").unwrap();

        ec2.attach_volume(&identity("i-aaa"), &volume, "/dev/sdf")
            .await
            .unwrap();

        assert_eq!(
            ec2.calls(),
            vec![Ec2Call::AttachVolume {
                instance: "i-aaa".to_string(),
                volume: "vol-12345678".to_string(),
                device: "/dev/sdf".to_string(),
            }]
        );
        let devices = ec2.block_device_names(&identity("i-aaa")).await.unwrap();
        assert_eq!(devices, vec!["/dev/sdf"]);
    }

    #[tokio::test]
    async fn test_memory_attach_error() {
        let ec2 = MemoryEc2::new().with_attach_error("VolumeInUse");
        let volume = VolumeId::parse("vol-12345678").unwrap();

        let err = ec2
            .attach_volume(&identity("i-aaa"), &volume, "/dev/sdf")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("VolumeInUse"));
    }
}
