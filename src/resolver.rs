// src/resolver.rs

//! Dependency resolution with managed install and mirror fallback
//!
//! # Resolution Flow
//!
//! ```text
//! ensure_installed(name)
//!     |
//!     v
//! any candidate installed? ──> Yes ──> AlreadyInstalled
//!     |
//!     No
//!     v
//! managed_install(name) ──> ok ──> Managed
//!     |
//!     failed
//!     v
//! any candidate installed now? ──> Yes ──> Managed
//!     |
//!     No
//!     v
//! for candidate in names, for mirror in mirrors:
//!     fetch -> non-empty? -> install_artifact ──> ok ──> Fetched
//!     (scratch artifact removed after every attempt)
//!     |
//!     v
//! PackageUnavailable
//! ```
//!
//! Every outcome carries the concrete name that ended up installed, which
//! may be a fallback name rather than the logical one.
//!
//! The resolver never exits the process: the orchestrator decides what a
//! `PackageUnavailable` means for the run.

use crate::error::{Error, Result};
use crate::manifest::PersistenceManifest;
use crate::packages::{NameResolver, PackageBackend};
use crate::repository::{artifact_url, Fetcher, MirrorSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

/// How a package ended up installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Already present under `name`; nothing was fetched
    AlreadyInstalled { name: String },
    /// Installed through the platform's package index
    Managed { name: String },
    /// Installed from an artifact fetched directly from a mirror
    Fetched { name: String, mirror: Url },
}

impl Resolution {
    /// Concrete package name that is installed
    pub fn installed_name(&self) -> &str {
        match self {
            Self::AlreadyInstalled { name } | Self::Managed { name } | Self::Fetched { name, .. } => {
                name
            }
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyInstalled { name } => write!(f, "already installed as {}", name),
            Self::Managed { name } => write!(f, "managed install of {}", name),
            Self::Fetched { name, mirror } => write!(f, "{} from {}", name, mirror),
        }
    }
}

/// Ensures declared packages are installed
pub struct DependencyResolver<'a, B: PackageBackend, F: Fetcher> {
    backend: &'a B,
    fetcher: &'a F,
    names: &'a NameResolver,
    mirrors: &'a MirrorSet,
    scratch_dir: PathBuf,
    keep_dir: Option<PathBuf>,
}

impl<'a, B: PackageBackend, F: Fetcher> DependencyResolver<'a, B, F> {
    pub fn new(
        backend: &'a B,
        fetcher: &'a F,
        names: &'a NameResolver,
        mirrors: &'a MirrorSet,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            fetcher,
            names,
            mirrors,
            scratch_dir: scratch_dir.into(),
            keep_dir: None,
        }
    }

    /// Copy each successfully installed artifact to `dir` before the scratch
    /// copy is removed
    pub fn keep_artifacts_in(mut self, dir: impl Into<PathBuf>) -> Self {
        self.keep_dir = Some(dir.into());
        self
    }

    /// Make sure `logical_name` is installed and recorded in the manifest
    pub fn ensure_installed(
        &self,
        logical_name: &str,
        manifest: &mut PersistenceManifest,
    ) -> Result<Resolution> {
        let resolution = self.resolve(logical_name)?;
        manifest.ensure_persisted(self.backend.representative_path(resolution.installed_name()))?;
        Ok(resolution)
    }

    /// Resolve every package in order, stopping at the first failure
    pub fn ensure_all(
        &self,
        packages: &[String],
        manifest: &mut PersistenceManifest,
    ) -> Result<Vec<(String, Resolution)>> {
        let mut resolved = Vec::with_capacity(packages.len());
        for name in packages {
            let resolution = self.ensure_installed(name, manifest)?;
            info!("{}: {}", name, resolution);
            resolved.push((name.clone(), resolution));
        }
        Ok(resolved)
    }

    fn resolve(&self, logical_name: &str) -> Result<Resolution> {
        let candidates = self.names.candidates(logical_name);

        if let Some(name) = self.installed_candidate(&candidates) {
            debug!("{} is already installed as {}", logical_name, name);
            return Ok(Resolution::AlreadyInstalled { name });
        }

        info!("Installing {} via managed install", logical_name);
        if self.backend.managed_install(logical_name) {
            return Ok(Resolution::Managed {
                name: logical_name.to_string(),
            });
        }

        // The managed path can install without reporting success
        if let Some(name) = self.installed_candidate(&candidates) {
            debug!("{} installed as {} despite managed install failure", logical_name, name);
            return Ok(Resolution::Managed { name });
        }

        warn!(
            "Managed install of {} failed, trying {} mirror(s) directly",
            logical_name,
            self.mirrors.iter().count()
        );

        for candidate in candidates {
            for mirror in self.mirrors.iter() {
                match self.try_direct(&candidate, mirror) {
                    Ok(()) => {
                        info!("Installed {} as {} from {}", logical_name, candidate, mirror);
                        return Ok(Resolution::Fetched {
                            name: candidate,
                            mirror: mirror.clone(),
                        });
                    }
                    Err(e) => {
                        debug!("{} from {} failed: {}", candidate, mirror, e);
                    }
                }
            }
        }

        Err(Error::PackageUnavailable {
            name: logical_name.to_string(),
        })
    }

    fn installed_candidate(&self, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .find(|name| self.backend.is_installed(name))
            .cloned()
    }

    /// One (candidate, mirror) attempt; the scratch artifact never outlives it
    fn try_direct(&self, candidate: &str, mirror: &Url) -> Result<()> {
        let url = artifact_url(mirror, candidate)?;
        let artifact = self.scratch_dir.join(format!("{}.tcz", candidate));

        let result = self.fetch_and_install(&url, &artifact);
        if result.is_ok() {
            if let Some(dir) = &self.keep_dir {
                keep_artifact(&artifact, dir);
            }
        }
        remove_artifact(&artifact);
        result
    }

    fn fetch_and_install(&self, url: &Url, artifact: &Path) -> Result<()> {
        let written = self.fetcher.fetch(url, artifact)?;
        if written == 0 {
            return Err(Error::TransientFetch(format!("Empty artifact from {}", url)));
        }
        self.backend.install_artifact(artifact)
    }
}

/// Copy `artifact` into `dir`; failure is only logged
fn keep_artifact(artifact: &Path, dir: &Path) {
    let Some(file_name) = artifact.file_name() else {
        return;
    };
    let target = dir.join(file_name);
    let copied = fs::create_dir_all(dir).and_then(|_| fs::copy(artifact, &target));
    match copied {
        Ok(_) => debug!("Kept {} as {}", artifact.display(), target.display()),
        Err(e) => warn!("Failed to keep {}: {}", artifact.display(), e),
    }
}

fn remove_artifact(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed scratch artifact {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
