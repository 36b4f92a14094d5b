//! Mount table inspection and the idempotent mount guard
//!
//! [`MountGuard::ensure_mounted`] only ever mounts when nothing is mounted at
//! the target and the device is not mounted anywhere else. Running it twice
//! with the same arguments is a no-op the second time.

use crate::devices::DeviceProbe;
use crate::error::{Result, VolumeError};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

const MOUNTS_PATH: &str = "/proc/self/mounts";

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
}

impl MountRecord {
    pub fn new(source: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            fstype: "auto".to_string(),
        }
    }
}

/// Access to the mount table and the mount operation
#[async_trait]
pub trait MountTable: Send + Sync {
    /// Current mounts, in table order
    fn mounts(&self) -> io::Result<Vec<MountRecord>>;

    /// Mount `device` at `mount_point`; failures are [`VolumeError::MountConflict`]
    async fn mount(&self, device: &Path, mount_point: &Path) -> Result<()>;
}

/// [`MountTable`] reading `/proc/self/mounts` and running `mount`
#[derive(Debug, Clone)]
pub struct ProcMounts {
    path: PathBuf,
    program: String,
}

impl Default for ProcMounts {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcMounts {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(MOUNTS_PATH),
            program: "mount".to_string(),
        }
    }

    /// Read the table from another file
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl MountTable for ProcMounts {
    fn mounts(&self) -> io::Result<Vec<MountRecord>> {
        Ok(parse_mounts(&std::fs::read_to_string(&self.path)?))
    }

    async fn mount(&self, device: &Path, mount_point: &Path) -> Result<()> {
        debug!(
            program = %self.program,
            device = %device.display(),
            mount_point = %mount_point.display(),
            "Running mount"
        );

        let output = Command::new(&self.program)
            .arg(device)
            .arg(mount_point)
            .output()
            .await
            .map_err(|e| {
                VolumeError::MountConflict(format!("failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VolumeError::MountConflict(format!(
                "mount {} on {} failed ({}): {}",
                device.display(),
                mount_point.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Parse `/proc/self/mounts` content
pub fn parse_mounts(content: &str) -> Vec<MountRecord> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next()?;
            Some(MountRecord {
                source: unescape(source),
                target: PathBuf::from(unescape(target)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Undo the kernel's octal escaping (`\040` for a space)
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let octal = bytes
            .get(i + 1..i + 4)
            .filter(|digits| digits.iter().all(|b| (b'0'..=b'7').contains(b)));
        if let (b'\\', Some(digits)) = (bytes[i], octal) {
            let value = digits
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// What [`MountGuard::ensure_mounted`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    AlreadyMounted,
    Mounted,
}

impl fmt::Display for MountOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountOutcome::AlreadyMounted => write!(f, "already mounted"),
            MountOutcome::Mounted => write!(f, "mounted"),
        }
    }
}

/// Mounts a device exactly once
pub struct MountGuard {
    probe: Arc<dyn DeviceProbe>,
    table: Arc<dyn MountTable>,
}

impl MountGuard {
    pub fn new(probe: Arc<dyn DeviceProbe>, table: Arc<dyn MountTable>) -> Self {
        Self { probe, table }
    }

    /// Canonical form of a mount source; non-path sources are left alone
    fn source_path(&self, source: &str) -> PathBuf {
        let path = Path::new(source);
        if path.is_absolute() {
            self.probe.canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
        } else {
            path.to_path_buf()
        }
    }

    pub async fn ensure_mounted(&self, device: &Path, mount_point: &Path) -> Result<MountOutcome> {
        if !self.probe.is_dir(mount_point) {
            return Err(VolumeError::InvalidTarget(format!(
                "{} is not a directory",
                mount_point.display()
            )));
        }
        if !self.probe.is_block_device(device) {
            return Err(VolumeError::InvalidTarget(format!(
                "{} is not a block device",
                device.display()
            )));
        }

        let device = self.probe.canonicalize(device).map_err(|e| {
            VolumeError::InvalidTarget(format!("cannot resolve {}: {}", device.display(), e))
        })?;
        let target = self
            .probe
            .canonicalize(mount_point)
            .unwrap_or_else(|_| mount_point.to_path_buf());

        let table = self.table.mounts()?;

        if let Some(record) = table.iter().rev().find(|r| r.target == target) {
            if self.source_path(&record.source) == device {
                debug!(
                    device = %device.display(),
                    mount_point = %target.display(),
                    fstype = %record.fstype,
                    "Already mounted"
                );
                return Ok(MountOutcome::AlreadyMounted);
            }
            return Err(VolumeError::MountConflict(format!(
                "{} is already mounted at {}",
                record.source,
                target.display()
            )));
        }

        if let Some(record) = table.iter().find(|r| self.source_path(&r.source) == device) {
            return Err(VolumeError::MountConflict(format!(
                "{} is already mounted at {}",
                device.display(),
                record.target.display()
            )));
        }

        self.table.mount(&device, &target).await?;
        info!(device = %device.display(), mount_point = %target.display(), "Mounted");

        Ok(MountOutcome::Mounted)
    }
}
