// src/packages/tce.rs

//! Tiny Core extension backend (`tce-load`)

use super::PackageBackend;
use crate::error::{Error, Result};
use crate::process;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Directory holding one marker file per loaded extension
pub const INSTALLED_DIR: &str = "/usr/local/tce.installed";

/// Link to the active extension directory; downloads land in `optional/`
pub const TCE_DIR: &str = "/etc/sysconfig/tcedir";

const TCE_LOAD: &str = "tce-load";

/// Backend driving `tce-load`
#[derive(Debug, Clone)]
pub struct TceBackend {
    installed_dir: PathBuf,
    tce_dir: PathBuf,
    timeout: Duration,
}

impl TceBackend {
    pub fn new(timeout: Duration) -> Self {
        Self {
            installed_dir: PathBuf::from(INSTALLED_DIR),
            tce_dir: PathBuf::from(TCE_DIR),
            timeout,
        }
    }

    /// Use a different marker directory
    pub fn with_installed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.installed_dir = dir.into();
        self
    }

    pub fn with_tce_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tce_dir = dir.into();
        self
    }

    /// Whether `tce-load` is on PATH
    pub fn available() -> bool {
        which::which(TCE_LOAD).is_ok()
    }
}

impl PackageBackend for TceBackend {
    fn is_installed(&self, name: &str) -> bool {
        self.installed_dir.join(name).exists()
    }

    fn managed_install(&self, name: &str) -> bool {
        match process::run(TCE_LOAD, ["-wi", name], self.timeout) {
            Ok(output) if output.success => true,
            Ok(output) => {
                debug!(
                    "tce-load -wi {} exited with {:?}: {}",
                    name,
                    output.code,
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("Managed install of {} failed: {}", name, e);
                false
            }
        }
    }

    fn install_artifact(&self, artifact: &Path) -> Result<()> {
        process::run_checked(TCE_LOAD, [OsStr::new("-i"), artifact.as_os_str()], self.timeout)
            .map(|_| ())
            .map_err(|e| {
                Error::CommandFailed(format!(
                    "Failed to install {}: {}",
                    artifact.display(),
                    e
                ))
            })
    }

    fn representative_path(&self, name: &str) -> PathBuf {
        self.installed_dir.join(name)
    }

    fn cached_artifact(&self, name: &str) -> Option<PathBuf> {
        let path = self.tce_dir.join("optional").join(format!("{}.tcz", name));
        path.is_file().then_some(path)
    }
}
