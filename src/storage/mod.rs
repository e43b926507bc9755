// src/storage/mod.rs

//! Persistent storage discovery
//!
//! The store is the one writable directory that holds extensions and
//! configuration between boots. Selection runs in two phases:
//!
//! 1. Reuse an already mounted device under the mount root that carries the
//!    persistence directory.
//! 2. Otherwise walk the block devices in scan order, mount each at
//!    `<mount root>/<device name>` if needed, and create the persistence
//!    directory on the first writable one.
//!
//! The chosen store must have at least the configured free space. Once a
//! store is returned there is no re-scan for the rest of the run.

mod blockdev;

pub use blockdev::{parse_lsblk, parse_mounts, BlockDevices, LinuxBlockDevices, MountEntry};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A device considered during the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCandidate {
    pub device: String,
    pub mount_point: Option<PathBuf>,
    pub writable: bool,
}

/// The directory chosen to hold persistent state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentStore {
    /// `<mount point>/<store dir>`
    pub path: PathBuf,
    pub mount_point: PathBuf,
    /// Backing device, when known
    pub device: Option<String>,
    pub free_kb: u64,
}

impl PersistentStore {
    /// Where downloaded and built extensions live
    pub fn optional_dir(&self) -> PathBuf {
        self.path.join("optional")
    }

    /// Extensions loaded at boot
    pub fn onboot_list(&self) -> PathBuf {
        self.path.join("onboot.lst")
    }
}

/// Finds or creates the persistent store
pub struct StorageLocator<'a, D: BlockDevices> {
    devices: &'a D,
    mount_root: PathBuf,
    store_dir: String,
    min_free_kb: u64,
}

impl<'a, D: BlockDevices> StorageLocator<'a, D> {
    pub fn new(
        devices: &'a D,
        mount_root: impl Into<PathBuf>,
        store_dir: impl Into<String>,
        min_free_kb: u64,
    ) -> Self {
        Self {
            devices,
            mount_root: mount_root.into(),
            store_dir: store_dir.into(),
            min_free_kb,
        }
    }

    /// Locate an existing store or create one, then check its capacity
    pub fn locate_or_create_store(&self) -> Result<PersistentStore> {
        let (path, mount_point, device) = match self.find_existing() {
            Some(found) => found,
            None => self.create_on_device()?,
        };

        let free_kb = self.devices.free_kb(&path)?;
        if free_kb < self.min_free_kb {
            warn!(
                "Store {} has {} KB free, below the {} KB floor",
                path.display(),
                free_kb,
                self.min_free_kb
            );
            return Err(Error::InsufficientSpace {
                available_kb: free_kb,
                required_kb: self.min_free_kb,
            });
        }

        info!("Using persistent store {} ({} KB free)", path.display(), free_kb);
        Ok(PersistentStore {
            path,
            mount_point,
            device,
            free_kb,
        })
    }

    /// Mount point path for a device: `/dev/sda1` -> `<root>/sda1`
    pub fn mount_point_for(&self, device: &str) -> PathBuf {
        let name = Path::new(device)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| device.trim_start_matches('/').replace('/', "_"));
        self.mount_root.join(name)
    }

    /// Phase 1: an existing mount already carrying the persistence directory
    fn find_existing(&self) -> Option<(PathBuf, PathBuf, Option<String>)> {
        let mounts = match self.devices.mounts() {
            Ok(mounts) => mounts,
            Err(e) => {
                warn!("Cannot read mount table: {}", e);
                return None;
            }
        };

        for entry in mounts {
            if entry.mount_point == self.mount_root
                || !entry.mount_point.starts_with(&self.mount_root)
            {
                continue;
            }
            let candidate = entry.mount_point.join(&self.store_dir);
            if candidate.is_dir() && self.devices.is_writable(&candidate) {
                info!("Found existing store {} on {}", candidate.display(), entry.device);
                return Some((candidate, entry.mount_point, Some(entry.device)));
            }
            debug!("{} has no usable {}", entry.mount_point.display(), self.store_dir);
        }
        None
    }

    /// Phase 2: mount devices in scan order and create the directory
    fn create_on_device(&self) -> Result<(PathBuf, PathBuf, Option<String>)> {
        let disks = self.devices.list_disks().map_err(|e| {
            warn!("Block device enumeration failed: {}", e);
            Error::NoWritableStorage
        })?;

        for device in disks {
            let candidate = self.prepare(&device);
            debug!("Candidate {:?}", candidate);

            let Some(mount_point) = candidate.mount_point.filter(|_| candidate.writable) else {
                continue;
            };

            let store = mount_point.join(&self.store_dir);
            match std::fs::create_dir_all(&store) {
                Ok(()) => {
                    info!("Created store {} on {}", store.display(), device);
                    return Ok((store, mount_point, Some(device)));
                }
                Err(e) => warn!("Cannot create {}: {}", store.display(), e),
            }
        }

        Err(Error::NoWritableStorage)
    }

    /// Ensure the device is mounted at its deterministic mount point
    fn prepare(&self, device: &str) -> StorageCandidate {
        let mount_point = self.mount_point_for(device);
        let mut candidate = StorageCandidate {
            device: device.to_string(),
            mount_point: None,
            writable: false,
        };

        if let Err(e) = std::fs::create_dir_all(&mount_point) {
            warn!("Cannot create mount point {}: {}", mount_point.display(), e);
            return candidate;
        }

        if !self.devices.is_mounted(&mount_point) {
            if let Err(e) = self.devices.mount(device, &mount_point) {
                warn!("Skipping {}: {}", device, e);
                return candidate;
            }
            info!("Mounted {} on {}", device, mount_point.display());
        }

        candidate.writable = self.devices.is_writable(&mount_point);
        candidate.mount_point = Some(mount_point);
        candidate
    }
}
