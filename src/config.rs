// src/config.rs

//! Provisioning configuration
//!
//! The declared package list, the name alternates and the mirror bases are
//! plain data so they can change between OS releases without touching code.
//!
//! # Example provision.toml
//!
//! ```toml
//! [provision]
//! packages = ["python3.9", "tk", "tcl"]
//! store_dir = "tce"
//! min_free_kb = 10240
//!
//! [alternates]
//! "python3.9" = ["python3.8", "python3.6"]
//!
//! [mirrors]
//! bases = ["http://repo.tinycorelinux.net", "http://distro.ibiblio.org/tinycorelinux"]
//!
//! [mirrors.platform]
//! armv7 = ["http://repo.tinycorelinux.net"]
//!
//! [application]
//! name = "desktop"
//! url = "https://example.org/desktop.py"
//! launch = "python3 /usr/local/bin/desktop &"
//!
//! [[branding]]
//! file = "/etc/issue"
//! from = "Tiny Core"
//! to = "My Desktop"
//!
//! [hooks]
//! hwdb_refresh = ["sudo", "-n", "udevadm", "trigger"]
//! squash = ["mksquashfs", "{src}", "{dest}", "-noappend"]
//! archive = ["filetool.sh", "-b"]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default path for the provisioning config file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tinyprov/provision.toml";

/// Minimum free space on the persistent store (10 MB)
pub const DEFAULT_MIN_FREE_KB: u64 = 10_240;

/// Full provisioning configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub provision: ProvisionSection,

    /// Logical package name -> fallback concrete names, in try order
    #[serde(default)]
    pub alternates: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub mirrors: MirrorConfig,

    #[serde(default)]
    pub application: Option<ApplicationConfig>,

    #[serde(default)]
    pub branding: Vec<BrandingRule>,

    #[serde(default)]
    pub hooks: HookConfig,
}

/// Core `[provision]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionSection {
    /// Packages that must be present after a run, in resolution order
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,

    /// Name of the persistence directory on a mounted device
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Directory under which devices are mounted
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,

    #[serde(default = "default_min_free_kb")]
    pub min_free_kb: u64,

    /// Persistence manifest consumed by the archival step
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,

    /// Scratch space for downloads and extension builds
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_managed_timeout")]
    pub managed_timeout_secs: u64,

    /// OS release override (otherwise detected)
    #[serde(default)]
    pub release: Option<String>,

    /// Boot and session configuration paths that must survive a reboot
    #[serde(default = "default_persist")]
    pub persist: Vec<PathBuf>,

    /// Boot script receiving the application launch line
    #[serde(default = "default_bootlocal")]
    pub bootlocal: PathBuf,
}

impl Default for ProvisionSection {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            store_dir: default_store_dir(),
            mount_root: default_mount_root(),
            min_free_kb: default_min_free_kb(),
            manifest: default_manifest(),
            scratch_dir: default_scratch_dir(),
            fetch_timeout_secs: default_fetch_timeout(),
            managed_timeout_secs: default_managed_timeout(),
            release: None,
            persist: default_persist(),
            bootlocal: default_bootlocal(),
        }
    }
}

impl ProvisionSection {
    /// Fetched artifacts wait here until the store can take them
    pub fn staging_dir(&self) -> PathBuf {
        self.scratch_dir.join("staged")
    }
}

/// `[mirrors]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Repository base URLs, tried in order
    #[serde(default = "default_mirror_bases")]
    pub bases: Vec<String>,

    /// Architecture-specific base lists replacing `bases`
    #[serde(default)]
    pub platform: HashMap<String, Vec<String>>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            bases: default_mirror_bases(),
            platform: HashMap::new(),
        }
    }
}

impl MirrorConfig {
    /// Base URLs for an architecture
    pub fn bases_for(&self, arch: &str) -> &[String] {
        self.platform
            .get(arch)
            .map(|v| v.as_slice())
            .unwrap_or(&self.bases)
    }
}

/// `[application]` section: the downstream desktop payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    pub url: String,

    /// Line appended to the boot script
    pub launch: String,

    /// Extensions the packaged application depends on
    #[serde(default)]
    pub depends: Vec<String>,

    #[serde(default = "default_app_version")]
    pub version: String,

    /// `Description:` field of the extension info file
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub author: Option<String>,
}

/// One `[[branding]]` substitution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrandingRule {
    pub file: PathBuf,
    pub from: String,
    pub to: String,
}

/// `[hooks]` section: external commands as argv arrays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default = "default_hwdb_refresh")]
    pub hwdb_refresh: Vec<String>,

    /// Extension builder; `{src}` and `{dest}` are replaced with the
    /// package directory and the archive path
    #[serde(default = "default_squash")]
    pub squash: Vec<String>,

    /// Final snapshot of the manifest paths
    #[serde(default = "default_archive")]
    pub archive: Vec<String>,

    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            hwdb_refresh: default_hwdb_refresh(),
            squash: default_squash(),
            archive: default_archive(),
            timeout_secs: default_hook_timeout(),
        }
    }
}

fn default_packages() -> Vec<String> {
    ["python3.9", "tk", "tcl", "python3.9-pip", "Xorg-7.7", "git"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_store_dir() -> String {
    "tce".to_string()
}

fn default_mount_root() -> PathBuf {
    PathBuf::from("/mnt")
}

fn default_min_free_kb() -> u64 {
    DEFAULT_MIN_FREE_KB
}

fn default_manifest() -> PathBuf {
    PathBuf::from("/opt/.filetool.lst")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("/tmp/tinyprov")
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_managed_timeout() -> u64 {
    120
}

fn default_persist() -> Vec<PathBuf> {
    ["/opt/bootlocal.sh", "/opt/.filetool.lst", "/etc/fstab", "/home/tc"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

fn default_bootlocal() -> PathBuf {
    PathBuf::from("/opt/bootlocal.sh")
}

fn default_mirror_bases() -> Vec<String> {
    [
        "http://repo.tinycorelinux.net",
        "http://distro.ibiblio.org/tinycorelinux",
        "http://tinycorelinux.net",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_app_version() -> String {
    "1.0".to_string()
}

fn default_hwdb_refresh() -> Vec<String> {
    ["sudo", "-n", "udevadm", "trigger"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_squash() -> Vec<String> {
    ["mksquashfs", "{src}", "{dest}", "-noappend"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_archive() -> Vec<String> {
    vec!["filetool.sh".to_string(), "-b".to_string()]
}

fn default_hook_timeout() -> u64 {
    60
}

impl ProvisionConfig {
    /// Load from a file, falling back to defaults when it does not exist
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        if !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config for values the run cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.provision.packages.is_empty() {
            return Err(Error::ConfigError("Package list is empty".to_string()));
        }
        if self.mirrors.bases.is_empty() {
            return Err(Error::ConfigError("Mirror list is empty".to_string()));
        }
        if let Some(app) = &self.application {
            if app.name.is_empty() || app.name.contains('/') {
                return Err(Error::ConfigError(format!(
                    "Application name must be a single path component, got '{}'",
                    app.name
                )));
            }
        }
        if self.hooks.squash.is_empty() {
            return Err(Error::ConfigError("hooks.squash must name a command".to_string()));
        }
        if self.provision.min_free_kb == 0 {
            return Err(Error::ConfigError(
                "min_free_kb must be greater than zero".to_string(),
            ));
        }
        if self.provision.store_dir.is_empty() || self.provision.store_dir.contains('/') {
            return Err(Error::ConfigError(format!(
                "store_dir must be a single directory name, got '{}'",
                self.provision.store_dir
            )));
        }
        if !self.provision.manifest.is_absolute() {
            return Err(Error::ConfigError(format!(
                "Manifest path must be absolute: {}",
                self.provision.manifest.display()
            )));
        }
        for path in &self.provision.persist {
            if !path.is_absolute() {
                return Err(Error::ConfigError(format!(
                    "Persist path must be absolute: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// Per-attempt network timeout
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.provision.fetch_timeout_secs)
    }

    pub fn managed_timeout(&self) -> Duration {
        Duration::from_secs(self.provision.managed_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProvisionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.provision.min_free_kb, 10_240);
        assert_eq!(config.provision.store_dir, "tce");
        assert!(!config.provision.packages.is_empty());
        assert_eq!(config.hooks.archive, ["filetool.sh", "-b"]);
        assert!(config.hooks.squash.iter().any(|a| a == "{src}"));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[provision]
packages = ["alpha", "beta"]
store_dir = "persist"
min_free_kb = 20000

[alternates]
alpha = ["alpha2.0"]

[mirrors]
bases = ["http://m1.example", "http://m2.example"]

[mirrors.platform]
armv7 = ["http://arm.example"]

[application]
name = "desktop"
url = "https://example.org/desktop.py"
launch = "python3 /usr/local/bin/desktop &"

[[branding]]
file = "/etc/issue"
from = "Tiny Core"
to = "Desk"
"#;
        let config = ProvisionConfig::parse(toml).unwrap();
        assert_eq!(config.provision.packages, vec!["alpha", "beta"]);
        assert_eq!(config.provision.store_dir, "persist");
        assert_eq!(config.alternates["alpha"], vec!["alpha2.0"]);
        assert_eq!(config.mirrors.bases_for("x86_64").len(), 2);
        assert_eq!(config.mirrors.bases_for("armv7"), ["http://arm.example"]);
        assert_eq!(config.application.unwrap().version, "1.0");
        assert_eq!(config.branding.len(), 1);
        // Unspecified values keep their defaults
        assert_eq!(config.provision.manifest, PathBuf::from("/opt/.filetool.lst"));
    }

    #[test]
    fn test_empty_package_list_rejected() {
        let toml = r#"
[provision]
packages = []
"#;
        let result = ProvisionConfig::parse(toml);
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_relative_persist_path_rejected() {
        let toml = r#"
[provision]
persist = ["opt/bootlocal.sh"]
"#;
        assert!(ProvisionConfig::parse(toml).is_err());
    }

    #[test]
    fn test_store_dir_must_be_single_component() {
        let toml = r#"
[provision]
store_dir = "a/b"
"#;
        assert!(ProvisionConfig::parse(toml).is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = ProvisionConfig::load(Some(&temp_dir.path().join("none.toml"))).unwrap();
        assert_eq!(config.provision.mount_root, PathBuf::from("/mnt"));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("provision.toml");
        std::fs::write(&path, "[provision]\nfetch_timeout_secs = 3\n").unwrap();
        let config = ProvisionConfig::load(Some(&path)).unwrap();
        assert_eq!(config.fetch_timeout(), Duration::from_secs(3));
    }
}
