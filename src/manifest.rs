// src/manifest.rs

//! Persistence manifest and boot-time extension list
//!
//! Both files are line-oriented, order-preserving sets: entries already on
//! disk are authoritative prior state, new entries are appended once, and
//! nothing is ever removed. The archival step reads the manifest to decide
//! what survives a reboot; the onboot list names extensions loaded at boot.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Order-preserving, deduplicating line file
#[derive(Debug)]
struct LineSet {
    path: PathBuf,
    entries: Vec<String>,
    seen: HashSet<String>,
}

impl LineSet {
    fn open(path: &Path) -> Result<Self> {
        let mut set = Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
            seen: HashSet::new(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::IoError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                set.push(line);
            }
            debug!("Loaded {} entries from {}", set.entries.len(), path.display());
        }

        Ok(set)
    }

    fn push(&mut self, entry: &str) -> bool {
        if self.seen.contains(entry) {
            return false;
        }
        self.seen.insert(entry.to_string());
        self.entries.push(entry.to_string());
        true
    }

    /// Insert and persist; returns false when already present
    fn insert(&mut self, entry: &str) -> Result<bool> {
        if !self.push(entry) {
            return Ok(false);
        }
        if let Err(e) = self.write() {
            // Keep memory in step with the file
            self.entries.pop();
            self.seen.remove(entry);
            return Err(e);
        }
        Ok(true)
    }

    /// Rewrite the file atomically (temp file in the same directory, then rename)
    fn write(&self) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| {
            Error::IoError(format!("Failed to create temp file in {}: {}", parent.display(), e))
        })?;
        for entry in &self.entries {
            writeln!(temp, "{}", entry)?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to write {}: {}", self.path.display(), e.error))
        })?;
        Ok(())
    }
}

/// Durable list of absolute paths included in every snapshot
#[derive(Debug)]
pub struct PersistenceManifest {
    lines: LineSet,
}

impl PersistenceManifest {
    /// Open the manifest, reading any entries already on disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            lines: LineSet::open(path.as_ref())?,
        })
    }

    /// Record `path` so it survives reboot
    ///
    /// Returns `true` when the path was newly added. Calling again with the
    /// same path is a no-op.
    pub fn ensure_persisted(&mut self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let entry = path.to_string_lossy();
        let entry = entry.trim();
        if entry.is_empty() || !Path::new(entry).is_absolute() {
            return Err(Error::InvalidPath(format!(
                "Persistence entries must be absolute paths: '{}'",
                entry
            )));
        }

        let added = self.lines.insert(entry)?;
        if added {
            info!("Persisting {}", entry);
        } else {
            debug!("{} already persisted", entry);
        }
        Ok(added)
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.lines.seen.contains(path.as_ref().to_string_lossy().trim())
    }

    /// Entries in first-insertion order
    pub fn entries(&self) -> &[String] {
        &self.lines.entries
    }
}

/// Extensions loaded at boot, one file name per line
#[derive(Debug)]
pub struct OnbootList {
    lines: LineSet,
}

impl OnbootList {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            lines: LineSet::open(path.as_ref())?,
        })
    }

    /// Register `<name>.tcz` for loading at boot (append if absent)
    pub fn register(&mut self, name: &str) -> Result<bool> {
        let entry = if name.ends_with(".tcz") {
            name.to_string()
        } else {
            format!("{}.tcz", name)
        };
        let added = self.lines.insert(&entry)?;
        if added {
            info!("Registered {} in {}", entry, self.lines.path.display());
        }
        Ok(added)
    }

    pub fn entries(&self) -> &[String] {
        &self.lines.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_persisted_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(".filetool.lst");
        let mut manifest = PersistenceManifest::open(&path).unwrap();

        assert!(manifest.ensure_persisted("/opt/bootlocal.sh").unwrap());
        assert!(manifest.ensure_persisted("/home/tc").unwrap());
        assert!(!manifest.ensure_persisted("/opt/bootlocal.sh").unwrap());

        assert_eq!(manifest.entries(), ["/opt/bootlocal.sh", "/home/tc"]);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "/opt/bootlocal.sh\n/home/tc\n");
    }

    #[test]
    fn test_existing_entries_preserved() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(".filetool.lst");
        // Prior file without trailing newline and with a blank line
        std::fs::write(&path, "/opt\n\n/home").unwrap();

        let mut manifest = PersistenceManifest::open(&path).unwrap();
        assert!(manifest.contains("/home"));
        assert!(!manifest.ensure_persisted("/home").unwrap());
        assert!(manifest.ensure_persisted("/etc/fstab").unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "/opt\n/home\n/etc/fstab\n");
    }

    #[test]
    fn test_reopen_sees_previous_run() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("sub").join(".filetool.lst");
        {
            let mut manifest = PersistenceManifest::open(&path).unwrap();
            manifest.ensure_persisted("/mnt/sda1/tce").unwrap();
        }
        let mut manifest = PersistenceManifest::open(&path).unwrap();
        assert!(!manifest.ensure_persisted("/mnt/sda1/tce").unwrap());
        assert_eq!(manifest.entries().len(), 1);
    }

    #[test]
    fn test_relative_path_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut manifest = PersistenceManifest::open(temp_dir.path().join("m.lst")).unwrap();
        let result = manifest.ensure_persisted("opt/bootlocal.sh");
        assert!(matches!(result, Err(Error::InvalidPath(_))));
        assert!(manifest.entries().is_empty());
    }

    #[test]
    fn test_onboot_register() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("onboot.lst");
        std::fs::write(&path, "Xorg-7.7.tcz\n").unwrap();

        let mut onboot = OnbootList::open(&path).unwrap();
        assert!(!onboot.register("Xorg-7.7").unwrap());
        assert!(onboot.register("tk").unwrap());
        assert!(!onboot.register("tk.tcz").unwrap());
        assert_eq!(onboot.entries(), ["Xorg-7.7.tcz", "tk.tcz"]);
    }
}
