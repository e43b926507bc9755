// src/storage/blockdev.rs

//! Block device discovery and mounting
//!
//! [`LinuxBlockDevices`] reads `/proc/mounts`, asks `lsblk` for the device
//! tree, and mounts through the `mount` binary (via `sudo` when needed) so
//! the filesystem type is auto-detected.

use crate::error::{Error, Result};
use crate::process;
use nix::unistd::{access, AccessFlags};
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const PROC_MOUNTS: &str = "/proc/mounts";
const LSBLK_TIMEOUT: Duration = Duration::from_secs(10);
const MOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
}

/// Block device and filesystem queries used by the storage locator
pub trait BlockDevices {
    /// Currently mounted filesystems, in mount-table order
    fn mounts(&self) -> Result<Vec<MountEntry>>;

    /// Devices that may carry a filesystem, in scan order
    fn list_disks(&self) -> Result<Vec<String>>;

    fn is_mounted(&self, path: &Path) -> bool;

    fn mount(&self, device: &str, path: &Path) -> Result<()>;

    fn is_writable(&self, path: &Path) -> bool;

    /// Free space available to unprivileged users, in KB
    fn free_kb(&self, path: &Path) -> Result<u64>;
}

/// Live system implementation
#[derive(Debug, Clone, Default)]
pub struct LinuxBlockDevices;

impl LinuxBlockDevices {
    pub fn new() -> Self {
        Self
    }
}

impl BlockDevices for LinuxBlockDevices {
    fn mounts(&self) -> Result<Vec<MountEntry>> {
        let content = std::fs::read_to_string(PROC_MOUNTS).map_err(|e| {
            Error::IoError(format!("Failed to read {}: {}", PROC_MOUNTS, e))
        })?;
        Ok(parse_mounts(&content))
    }

    fn list_disks(&self) -> Result<Vec<String>> {
        let output = process::run_checked(
            "lsblk",
            ["--json", "-o", "NAME,PATH,TYPE,MOUNTPOINT"],
            LSBLK_TIMEOUT,
        )?;
        parse_lsblk(&output.stdout)
    }

    fn is_mounted(&self, path: &Path) -> bool {
        self.mounts()
            .map(|mounts| mounts.iter().any(|m| m.mount_point == path))
            .unwrap_or(false)
    }

    fn mount(&self, device: &str, path: &Path) -> Result<()> {
        process::run_privileged(
            "mount",
            [OsStr::new(device), path.as_os_str()],
            MOUNT_TIMEOUT,
        )
        .map(|_| ())
        .map_err(|e| Error::MountError(format!("{} on {}: {}", device, path.display(), e)))
    }

    fn is_writable(&self, path: &Path) -> bool {
        access(path, AccessFlags::W_OK).is_ok()
    }

    fn free_kb(&self, path: &Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|e| {
            Error::IoError(format!("statvfs {} failed: {}", path.display(), e))
        })?;
        let bytes = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
        Ok(bytes / 1024)
    }
}

/// Parse `/proc/mounts` content
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            Some(MountEntry {
                device: device.to_string(),
                mount_point: PathBuf::from(unescape_mount_field(mount_point)),
            })
        })
        .collect()
}

/// `/proc/mounts` escapes space, tab, newline and backslash as octal
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

#[derive(Debug, Deserialize)]
struct LsblkResponse {
    #[serde(default)]
    blockdevices: Vec<LsblkNode>,
}

#[derive(Debug, Deserialize)]
struct LsblkNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "type")]
    #[serde(default)]
    device_type: Option<String>,
    #[serde(default)]
    children: Vec<LsblkNode>,
}

impl LsblkNode {
    fn device_path(&self) -> Option<String> {
        self.path
            .clone()
            .or_else(|| self.name.as_ref().map(|n| format!("/dev/{}", n)))
    }
}

/// Partitions, plus whole disks that carry no partition table
pub fn parse_lsblk(json: &str) -> Result<Vec<String>> {
    let decoded: LsblkResponse = serde_json::from_str(json)
        .map_err(|e| Error::ParseError(format!("Failed to parse lsblk JSON output: {e}")))?;

    let mut devices = Vec::new();
    for node in &decoded.blockdevices {
        collect_devices(node, &mut devices);
    }
    debug!("lsblk reported {} candidate device(s)", devices.len());
    Ok(devices)
}

fn collect_devices(node: &LsblkNode, out: &mut Vec<String>) {
    let kind = node.device_type.as_deref().unwrap_or("");
    let has_partitions = node
        .children
        .iter()
        .any(|c| c.device_type.as_deref() == Some("part"));

    let usable = match kind {
        "part" => true,
        "disk" => !has_partitions,
        _ => false,
    };
    if usable {
        if let Some(path) = node.device_path() {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }

    for child in &node.children {
        collect_devices(child, out);
    }
}
