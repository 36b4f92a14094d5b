//! Compute API via the provider's command-line client
//!
//! Each call runs `aws ec2 <operation> ... --region <region> --output json`
//! and reads only the fields it needs from the JSON response. Credentials
//! are whatever the CLI finds on its own (normally the instance profile).

use crate::api::Ec2Api;
use crate::error::{CloudError, Result};
use crate::types::{VolumeAttachment, VolumeId};
use async_trait::async_trait;
use moor_metadata::InstanceIdentity;
use serde::Deserialize;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::{debug, info};

/// Default provider CLI program
pub const DEFAULT_PROGRAM: &str = "aws";

/// [`Ec2Api`] backed by the `aws` command-line client
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
}

impl Default for AwsCli {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsCli {
    pub fn new() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
        }
    }

    /// Use a different program (absolute path or name on `PATH`)
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list for an operation
    pub fn command_args(&self, operation: &str, region: &str, args: &[&str]) -> Vec<String> {
        let mut full = vec!["ec2".to_string(), operation.to_string()];
        full.extend(args.iter().map(|a| a.to_string()));
        full.extend(
            ["--region", region, "--output", "json"]
                .iter()
                .map(|a| a.to_string()),
        );
        full
    }

    /// Run an operation and return its stdout
    async fn run(
        &self,
        operation: &str,
        identity: &InstanceIdentity,
        args: &[&str],
    ) -> Result<Vec<u8>> {
        let full = self.command_args(operation, identity.region.as_str(), args);
        debug!(program = %self.program, args = ?full, "Running compute API call");

        let output = Command::new(&self.program)
            .args(&full)
            .output()
            .await
            .map_err(|e| CloudError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CloudError::CallFailed {
                operation: operation.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Ec2Api for AwsCli {
    async fn block_device_names(&self, identity: &InstanceIdentity) -> Result<Vec<String>> {
        let stdout = self
            .run(
                "describe-instances",
                identity,
                &["--instance-ids", identity.instance_id.as_str()],
            )
            .await?;
        parse_block_device_names(&stdout, identity.instance_id.as_str())
    }

    async fn volume_attachments(
        &self,
        identity: &InstanceIdentity,
    ) -> Result<Vec<VolumeAttachment>> {
        let filter = format!("Name=attachment.instance-id,Values={}", identity.instance_id);
        let stdout = self
            .run("describe-volumes", identity, &["--filters", &filter])
            .await?;
        parse_volume_attachments(&stdout, identity.instance_id.as_str())
    }

    async fn attach_volume(
        &self,
        identity: &InstanceIdentity,
        volume: &VolumeId,
        device: &str,
    ) -> Result<()> {
        self.run(
            "attach-volume",
            identity,
            &[
                "--volume-id",
                volume.as_str(),
                "--instance-id",
                identity.instance_id.as_str(),
                "--device",
                device,
            ],
        )
        .await?;
        info!(
            volume = %volume,
            device = %device,
            instance = %identity.instance_id,
            "Attach requested"
        );
        Ok(())
    }

    async fn associate_address(
        &self,
        identity: &InstanceIdentity,
        address: Ipv4Addr,
    ) -> Result<()> {
        let address = address.to_string();
        self.run(
            "associate-address",
            identity,
            &[
                "--instance-id",
                identity.instance_id.as_str(),
                "--public-ip",
                &address,
            ],
        )
        .await?;
        info!(address = %address, instance = %identity.instance_id, "Address associated");
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    block_device_mappings: Vec<BlockDeviceMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockDeviceMapping {
    device_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeVolumesOutput {
    #[serde(default)]
    volumes: Vec<Volume>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Volume {
    volume_id: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Attachment {
    instance_id: String,
    device: String,
    #[serde(default)]
    state: Option<String>,
}

fn parse_json<'a, T: Deserialize<'a> + Default>(operation: &str, stdout: &'a [u8]) -> Result<T> {
    if stdout.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(stdout).map_err(|e| CloudError::Parse {
        operation: operation.to_string(),
        reason: e.to_string(),
    })
}

/// Extract block-device names for `instance_id` from describe-instances output
pub fn parse_block_device_names(stdout: &[u8], instance_id: &str) -> Result<Vec<String>> {
    let output: DescribeInstancesOutput = parse_json("describe-instances", stdout)?;

    Ok(output
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .filter(|i| i.instance_id.is_empty() || i.instance_id == instance_id)
        .flat_map(|i| i.block_device_mappings)
        .map(|m| m.device_name)
        .collect())
}

/// Extract attachments to `instance_id` from describe-volumes output
pub fn parse_volume_attachments(stdout: &[u8], instance_id: &str) -> Result<Vec<VolumeAttachment>> {
    let output: DescribeVolumesOutput = parse_json("describe-volumes", stdout)?;

    Ok(output
        .volumes
        .into_iter()
        .flat_map(|v| {
            let volume_id = v.volume_id;
            v.attachments
                .into_iter()
                .filter(move |a| a.instance_id == instance_id)
                .map(move |a| VolumeAttachment {
                    volume_id: volume_id.clone(),
                    instance_id: a.instance_id,
                    device: a.device,
                    state: a.state,
                })
        })
        .collect())
}
