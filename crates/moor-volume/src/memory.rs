//! In-memory host for testing
//!
//! [`MemoryHost`] implements both [`DeviceProbe`] and [`MountTable`]. A path
//! under `/dev` exists (and is a block device) while its name is listed in
//! the partition table, the way udev would have it.

use crate::devices::DeviceProbe;
use crate::error::{Result, VolumeError};
use crate::mount::{MountRecord, MountTable};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Default)]
struct HostState {
    partitions: Vec<String>,
    /// (name, reads left before it shows up)
    pending: Vec<(String, usize)>,
    partition_reads: usize,
    symlinks: HashMap<PathBuf, PathBuf>,
    dirs: HashSet<PathBuf>,
    files: HashSet<PathBuf>,
    mounts: Vec<MountRecord>,
    mount_calls: Vec<(PathBuf, PathBuf)>,
    mount_error: Option<String>,
}

impl HostState {
    fn is_device(&self, path: &Path) -> bool {
        path.parent() == Some(Path::new("/dev"))
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| self.partitions.iter().any(|p| p == n))
    }

    fn exists(&self, path: &Path) -> bool {
        self.dirs.contains(path) || self.files.contains(path) || self.is_device(path)
    }

    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let resolved = match self.symlinks.get(path) {
            Some(target) if target.is_relative() => path
                .parent()
                .unwrap_or_else(|| Path::new("/"))
                .join(target),
            Some(target) => target.clone(),
            None => path.to_path_buf(),
        };

        if self.exists(&resolved) {
            Ok(resolved)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", resolved.display()),
            ))
        }
    }
}

/// Fake kernel, filesystem and mount table
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: RwLock<HostState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel device that is already present
    pub fn with_partition(self, name: &str) -> Self {
        self.state.write().unwrap().partitions.push(name.to_string());
        self
    }

    /// Kernel device that appears only after `reads` partition-table reads
    pub fn with_delayed_partition(self, name: &str, reads: usize) -> Self {
        self.state
            .write()
            .unwrap()
            .pending
            .push((name.to_string(), reads));
        self
    }

    pub fn with_symlink(self, link: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        self.state
            .write()
            .unwrap()
            .symlinks
            .insert(link.into(), target.into());
        self
    }

    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        self.state.write().unwrap().dirs.insert(path.into());
        self
    }

    /// Regular file
    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        self.state.write().unwrap().files.insert(path.into());
        self
    }

    pub fn with_mount(self, source: &str, target: impl Into<PathBuf>) -> Self {
        self.state
            .write()
            .unwrap()
            .mounts
            .push(MountRecord::new(source, target));
        self
    }

    /// Make every mount call fail
    pub fn with_mount_error(self, message: impl Into<String>) -> Self {
        self.state.write().unwrap().mount_error = Some(message.into());
        self
    }

    /// (device, mount point) for every mount call made so far
    pub fn mount_calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.state.read().unwrap().mount_calls.clone()
    }

    pub fn partition_reads(&self) -> usize {
        self.state.read().unwrap().partition_reads
    }

    pub fn has_dir(&self, path: impl AsRef<Path>) -> bool {
        self.state.read().unwrap().dirs.contains(path.as_ref())
    }
}

impl DeviceProbe for MemoryHost {
    fn partitions(&self) -> io::Result<Vec<String>> {
        let mut state = self.state.write().unwrap();
        state.partition_reads += 1;

        let pending = std::mem::take(&mut state.pending);
        for (name, reads) in pending {
            if reads == 0 {
                state.partitions.push(name);
            } else {
                state.pending.push((name, reads - 1));
            }
        }

        Ok(state.partitions.clone())
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        self.state.read().unwrap().resolve(path)
    }

    fn is_symlink(&self, path: &Path) -> bool {
        self.state.read().unwrap().symlinks.contains_key(path)
    }

    fn is_block_device(&self, path: &Path) -> bool {
        let state = self.state.read().unwrap();
        state.resolve(path).is_ok_and(|p| state.is_device(&p))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.state.read().unwrap().dirs.contains(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.write().unwrap();
        if state.files.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a directory", path.display()),
            ));
        }
        for ancestor in path.ancestors() {
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }
}

#[async_trait]
impl MountTable for MemoryHost {
    fn mounts(&self) -> io::Result<Vec<MountRecord>> {
        Ok(self.state.read().unwrap().mounts.clone())
    }

    async fn mount(&self, device: &Path, mount_point: &Path) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state
            .mount_calls
            .push((device.to_path_buf(), mount_point.to_path_buf()));

        if let Some(message) = &state.mount_error {
            return Err(VolumeError::MountConflict(format!(
                "mount {} on {} failed: {}",
                device.display(),
                mount_point.display(),
                message
            )));
        }

        state.mounts.push(MountRecord::new(
            device.to_string_lossy().into_owned(),
            mount_point,
        ));
        Ok(())
    }
}
