// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! Every external capability gets an in-memory fake; filesystem effects land
//! in a per-test temporary directory laid out like the live system.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tinyprov::config::{ApplicationConfig, ProvisionConfig};
use tinyprov::storage::MountEntry;
use tinyprov::{
    BlockDevices, Error, Fetcher, MirrorSet, PackageBackend, Result, SystemHooks,
};
use url::Url;

pub const M1: &str = "http://m1.example/15.x/x86_64/tcz/";
pub const M2: &str = "http://m2.example/15.x/x86_64/tcz/";

pub fn mirrors() -> MirrorSet {
    MirrorSet::from_urls([M1, M2]).unwrap()
}

/// Temporary root with config paths pointing inside it
pub struct Sandbox {
    pub dir: TempDir,
    pub config: ProvisionConfig,
}

impl Sandbox {
    pub fn new(packages: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("mnt")).unwrap();
        fs::create_dir_all(root.join("opt")).unwrap();

        let mut config = ProvisionConfig::default();
        config.provision.packages = packages.iter().map(|p| p.to_string()).collect();
        config.provision.mount_root = root.join("mnt");
        config.provision.manifest = root.join("opt/.filetool.lst");
        config.provision.scratch_dir = root.join("tmp/tinyprov");
        config.provision.bootlocal = root.join("opt/bootlocal.sh");
        config.provision.persist = vec![root.join("etc/fstab"), root.join("home/tc")];
        config.validate().unwrap();

        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn mount_point(&self, device_name: &str) -> PathBuf {
        self.root().join("mnt").join(device_name)
    }

    pub fn with_application(mut self) -> Self {
        self.config.application = Some(ApplicationConfig {
            name: "desktop".to_string(),
            url: "http://apps.example/desktop".to_string(),
            launch: "python3 /usr/local/bin/desktop &".to_string(),
            depends: vec!["python3.9".to_string()],
            version: "1.0".to_string(),
            description: None,
            author: None,
        });
        self
    }

    pub fn manifest_lines(&self) -> Vec<String> {
        read_lines(&self.config.provision.manifest)
    }

    /// Write `<name>.tcz` into a download cache outside the store
    pub fn cached_artifact(&self, name: &str) -> PathBuf {
        let dir = self.root().join("tcedir/optional");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.tcz", name));
        fs::write(&path, format!("hsqs-{}", name)).unwrap();
        path
    }
}

/// Every `onboot.lst` entry of `store` must have its file in `optional/`
pub fn assert_boot_list_stocked(store: &tinyprov::PersistentStore) {
    for entry in read_lines(&store.onboot_list()) {
        assert!(
            store.optional_dir().join(&entry).is_file(),
            "{} listed for boot but missing from optional/",
            entry
        );
    }
}

pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

/// Package backend whose managed path fails unless enabled
#[derive(Default)]
pub struct FakeBackend {
    pub installed: RefCell<HashSet<String>>,
    pub managed_ok: bool,
    pub managed_calls: RefCell<Vec<String>>,
    pub cache: HashMap<String, PathBuf>,
}

impl FakeBackend {
    pub fn with_installed(names: &[&str]) -> Self {
        let backend = Self::default();
        for name in names {
            backend.installed.borrow_mut().insert(name.to_string());
        }
        backend
    }
}

impl PackageBackend for FakeBackend {
    fn is_installed(&self, name: &str) -> bool {
        self.installed.borrow().contains(name)
    }

    fn managed_install(&self, name: &str) -> bool {
        self.managed_calls.borrow_mut().push(name.to_string());
        if self.managed_ok {
            self.installed.borrow_mut().insert(name.to_string());
        }
        self.managed_ok
    }

    fn install_artifact(&self, artifact: &Path) -> Result<()> {
        let stem = artifact
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(artifact.display().to_string()))?;
        self.installed.borrow_mut().insert(stem);
        Ok(())
    }

    fn representative_path(&self, name: &str) -> PathBuf {
        PathBuf::from("/usr/local/tce.installed").join(name)
    }

    fn cached_artifact(&self, name: &str) -> Option<PathBuf> {
        self.cache.get(name).cloned()
    }
}

/// Serves fixed bodies by URL and records every request
#[derive(Default)]
pub struct FakeFetcher {
    pub bodies: HashMap<String, String>,
    pub requests: RefCell<Vec<String>>,
}

impl FakeFetcher {
    pub fn serving(entries: &[(&str, &str)]) -> Self {
        Self {
            bodies: entries
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Fetcher for FakeFetcher {
    fn fetch(&self, url: &Url, dest: &Path) -> Result<u64> {
        self.requests.borrow_mut().push(url.to_string());
        match self.bodies.get(url.as_str()) {
            Some(body) => {
                fs::write(dest, body)?;
                Ok(body.len() as u64)
            }
            None => Err(Error::TransientFetch(format!("404 Not Found: {}", url))),
        }
    }
}

/// Block devices backed by directories under the sandbox mount root
#[derive(Default)]
pub struct FakeDevices {
    pub disks: Vec<String>,
    pub mounted: RefCell<Vec<MountEntry>>,
    pub read_only: HashSet<PathBuf>,
    pub free: HashMap<PathBuf, u64>,
    pub mount_calls: RefCell<Vec<String>>,
}

impl FakeDevices {
    pub fn new(disks: &[&str]) -> Self {
        Self {
            disks: disks.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl BlockDevices for FakeDevices {
    fn mounts(&self) -> Result<Vec<MountEntry>> {
        Ok(self.mounted.borrow().clone())
    }

    fn list_disks(&self) -> Result<Vec<String>> {
        Ok(self.disks.clone())
    }

    fn is_mounted(&self, path: &Path) -> bool {
        self.mounted.borrow().iter().any(|m| m.mount_point == path)
    }

    fn mount(&self, device: &str, path: &Path) -> Result<()> {
        self.mount_calls.borrow_mut().push(device.to_string());
        self.mounted.borrow_mut().push(MountEntry {
            device: device.to_string(),
            mount_point: path.to_path_buf(),
        });
        Ok(())
    }

    fn is_writable(&self, path: &Path) -> bool {
        !self.read_only.iter().any(|ro| path.starts_with(ro))
    }

    fn free_kb(&self, path: &Path) -> Result<u64> {
        Ok(self
            .free
            .iter()
            .find(|(mount, _)| path.starts_with(mount))
            .map(|(_, kb)| *kb)
            .unwrap_or(0))
    }
}

/// Hooks recording their calls, with switchable failures
#[derive(Default)]
pub struct FakeHooks {
    pub preflight_error: Option<String>,
    pub fail_hwdb: bool,
    pub fail_archive: bool,
    pub calls: RefCell<Vec<&'static str>>,
}

impl SystemHooks for FakeHooks {
    fn preflight(&self, _mirrors: &MirrorSet) -> Result<()> {
        self.calls.borrow_mut().push("preflight");
        match &self.preflight_error {
            Some(msg) => Err(Error::Preflight(msg.clone())),
            None => Ok(()),
        }
    }

    fn build_extension(&self, package_dir: &Path, archive: &Path) -> Result<()> {
        self.calls.borrow_mut().push("build_extension");
        assert!(package_dir.join("usr/local/bin").is_dir());
        fs::write(archive, vec![0u8; 2048])?;
        Ok(())
    }

    fn refresh_hwdb(&self) -> Result<()> {
        self.calls.borrow_mut().push("refresh_hwdb");
        if self.fail_hwdb {
            return Err(Error::CommandFailed("'udevadm' failed with exit code 1".to_string()));
        }
        Ok(())
    }

    fn trigger_archive(&self) -> Result<()> {
        self.calls.borrow_mut().push("trigger_archive");
        if self.fail_archive {
            return Err(Error::CommandFailed("'filetool.sh' failed with exit code 1".to_string()));
        }
        Ok(())
    }
}
