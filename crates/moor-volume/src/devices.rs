//! Block device discovery and allocation
//!
//! Device names are slippery: a volume attached as `/dev/sdf` may show up
//! in the kernel as `xvdf` (Xen) or as a symlink to `nvme1n1` (Nitro). All
//! matching here goes through [`kernel_names`] so the three spellings are
//! treated as one device.

use crate::error::{Result, VolumeError};
use moor_ec2::Ec2Api;
use moor_metadata::InstanceIdentity;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Device paths offered to the compute API, in order of preference
pub const DEFAULT_CANDIDATES: [&str; 7] = [
    "/dev/sdf", "/dev/sdg", "/dev/sdh", "/dev/sdi", "/dev/sdj", "/dev/sdk", "/dev/sdl",
];

const PARTITIONS_PATH: &str = "/proc/partitions";

/// Read-only view of the local kernel and filesystem, plus directory creation
pub trait DeviceProbe: Send + Sync {
    /// Names listed in the kernel partition table
    fn partitions(&self) -> io::Result<Vec<String>>;

    /// Fully resolved path; fails if it does not exist
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    fn is_symlink(&self, path: &Path) -> bool;

    /// Block-special file, following symlinks
    fn is_block_device(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`DeviceProbe`] over the real filesystem
///
/// Every absolute path is interpreted relative to `root`, which is `/` in
/// production.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    root: PathBuf,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    fn host_path(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    fn guest_path(&self, path: PathBuf) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(relative) => Path::new("/").join(relative),
            Err(_) => path,
        }
    }
}

impl DeviceProbe for SystemProbe {
    fn partitions(&self) -> io::Result<Vec<String>> {
        let content = fs::read_to_string(self.host_path(Path::new(PARTITIONS_PATH)))?;
        Ok(parse_partitions(&content))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(self.host_path(path)).map(|p| self.guest_path(p))
    }

    fn is_symlink(&self, path: &Path) -> bool {
        fs::symlink_metadata(self.host_path(path))
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    fn is_block_device(&self, path: &Path) -> bool {
        fs::metadata(self.host_path(path))
            .map(|m| m.file_type().is_block_device())
            .unwrap_or(false)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.host_path(path).is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        DirBuilder::new().recursive(true).create(self.host_path(path))
    }
}

/// Device names from `/proc/partitions` content
///
/// ```text
/// major minor  #blocks  name
///
///  259        0    8388608 nvme0n1
/// ```
pub fn parse_partitions(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [major, _, _, name] if major.parse::<u32>().is_ok() => Some(name.to_string()),
                _ => None,
            }
        })
        .collect()
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

/// `sdf` is `xvdf` on Xen instances
fn xvd_alias(name: &str) -> Option<String> {
    name.strip_prefix("sd").map(|rest| format!("xvd{}", rest))
}

/// Slot name shared by both spellings of a device (`xvdf` -> `sdf`)
fn slot(device: &str) -> String {
    let name = base_name(Path::new(device)).unwrap_or_else(|| device.to_string());
    match name.strip_prefix("xvd") {
        Some(rest) => format!("sd{}", rest),
        None => name,
    }
}

/// Every kernel name `device` may appear under
pub fn kernel_names(probe: &dyn DeviceProbe, device: &str) -> Vec<String> {
    let path = Path::new(device);
    let mut names = Vec::new();

    if let Some(base) = base_name(path) {
        let alias = xvd_alias(&base);
        names.push(base);
        names.extend(alias);
    }

    if probe.is_symlink(path) {
        if let Some(target) = probe.canonicalize(path).ok().and_then(|t| base_name(&t)) {
            if !names.contains(&target) {
                names.push(target);
            }
        }
    }

    names
}

/// Path under which `device` is visible to the kernel, if it is yet
pub fn visible_device(probe: &dyn DeviceProbe, device: &str) -> io::Result<Option<PathBuf>> {
    let path = Path::new(device);
    let partitions = probe.partitions()?;
    let resolved = probe
        .canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf());

    let Some(base) = base_name(&resolved) else {
        return Ok(None);
    };
    if partitions.contains(&base) {
        return Ok(Some(resolved));
    }
    if let Some(alias) = xvd_alias(&base).filter(|a| partitions.contains(a)) {
        return Ok(Some(resolved.with_file_name(alias)));
    }

    Ok(None)
}

/// Picks the device path to offer for a new attachment
pub struct DeviceAllocator {
    probe: Arc<dyn DeviceProbe>,
    ec2: Arc<dyn Ec2Api>,
    candidates: Vec<String>,
}

impl DeviceAllocator {
    pub fn new(probe: Arc<dyn DeviceProbe>, ec2: Arc<dyn Ec2Api>) -> Self {
        Self {
            probe,
            ec2,
            candidates: DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    /// First candidate neither the kernel nor the compute API considers taken
    pub async fn next_free_device(&self, identity: &InstanceIdentity) -> Result<String> {
        let assigned = self.ec2.block_device_names(identity).await?;
        let partitions = self.probe.partitions()?;

        for candidate in &self.candidates {
            let names = kernel_names(self.probe.as_ref(), candidate);
            if let Some(name) = names.iter().find(|n| partitions.contains(n)) {
                debug!(device = %candidate, kernel_name = %name, "Candidate known to kernel");
                continue;
            }

            if let Some(mapping) = assigned.iter().find(|a| slot(a) == slot(candidate)) {
                debug!(
                    device = %candidate,
                    mapping = %mapping,
                    "Candidate assigned by compute API"
                );
                continue;
            }

            info!(device = %candidate, "Allocated device");
            return Ok(candidate.clone());
        }

        Err(VolumeError::NoDeviceAvailable(self.candidates.join(", ")))
    }
}
