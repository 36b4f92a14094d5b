use super::GlobalArgs;
use clap::Args;
use color_eyre::eyre::Result;
use moor_volume::{AttachConfig, ProcMounts, SystemProbe, VolumeAttacher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Args, Debug)]
pub struct EnsureVolumeArgs {
    /// Volume to attach, e.g. vol-0123456789abcdef0
    pub volume_id: String,

    /// Absolute directory to mount the volume at; created if missing
    pub mount_point: String,

    /// Seconds to wait for the device to appear (0 waits forever)
    #[arg(long, env = "MOOR_DEVICE_TIMEOUT", default_value_t = 0)]
    pub device_timeout: u64,
}

impl EnsureVolumeArgs {
    pub fn attach_config(&self) -> AttachConfig {
        let timeout = (self.device_timeout > 0).then(|| Duration::from_secs(self.device_timeout));
        AttachConfig::default().with_device_timeout(timeout)
    }
}

pub async fn run_ensure(
    args: EnsureVolumeArgs,
    global: &GlobalArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let attacher = VolumeAttacher::new(
        global.metadata_client()?,
        Arc::new(global.aws_cli()),
        Arc::new(SystemProbe::new()),
        Arc::new(ProcMounts::new()),
    )
    .with_config(args.attach_config())
    .with_cancellation(cancel);

    let report = attacher
        .ensure_volume_attached(&args.volume_id, &args.mount_point)
        .await?;

    info!(
        volume = %report.volume,
        device = %report.visible_device.display(),
        mount_point = %report.mount_point,
        "Volume {}",
        report.outcome
    );
    Ok(())
}
