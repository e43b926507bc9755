// src/orchestrator.rs

//! Installation orchestration
//!
//! One provisioning pass, in fixed order:
//!
//! 1. Preflight (not root, first mirror reachable)
//! 2. Dependency resolution over the declared package list
//! 3. Application payload fetch, extension build, autostart registration
//! 4. Persistent store selection
//! 5. Manifest entries for the store and configuration paths
//! 6. Boot registration of packages and the payload extension; a package is
//!    listed in `onboot.lst` only once its `.tcz` sits in `<store>/optional`
//! 7. Branding, hardware database refresh, archival trigger
//!
//! Errors from steps 1-6 abort the run with the error's exit code. Step 7
//! only produces warnings. Nothing is rolled back: every step is idempotent,
//! so a failed run is fixed by running again.

use crate::config::{HookConfig, ProvisionConfig};
use crate::error::{Error, Result};
use crate::manifest::{OnbootList, PersistenceManifest};
use crate::packages::{NameResolver, PackageBackend};
use crate::payload::{self, Extension};
use crate::process;
use crate::repository::{Fetcher, HttpFetcher, MirrorSet};
use crate::resolver::{DependencyResolver, Resolution};
use crate::storage::{BlockDevices, PersistentStore, StorageLocator};
use nix::unistd::geteuid;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment checks and external commands around the core steps
pub trait SystemHooks {
    /// Refuse to start when the environment cannot complete a run
    fn preflight(&self, mirrors: &MirrorSet) -> Result<()>;

    /// Produce the squashed archive at `archive` from `package_dir`
    fn build_extension(&self, package_dir: &Path, archive: &Path) -> Result<()>;

    fn refresh_hwdb(&self) -> Result<()>;

    /// Snapshot everything listed in the persistence manifest
    fn trigger_archive(&self) -> Result<()>;
}

/// Hooks backed by the running system
pub struct LiveHooks {
    config: HookConfig,
    prober: HttpFetcher,
}

impl LiveHooks {
    pub fn new(config: HookConfig, probe_timeout: Duration) -> Result<Self> {
        Ok(Self {
            config,
            prober: HttpFetcher::new(probe_timeout)?,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }
}

impl SystemHooks for LiveHooks {
    fn preflight(&self, mirrors: &MirrorSet) -> Result<()> {
        if geteuid().is_root() {
            return Err(Error::Preflight(
                "running as root; run as the regular user (tce-load refuses root)".to_string(),
            ));
        }
        self.prober.probe(mirrors.primary())
    }

    fn build_extension(&self, package_dir: &Path, archive: &Path) -> Result<()> {
        let src = package_dir.to_string_lossy();
        let dest = archive.to_string_lossy();
        let argv: Vec<String> = self
            .config
            .squash
            .iter()
            .map(|arg| arg.replace("{src}", &src).replace("{dest}", &dest))
            .collect();
        process::run_argv(&argv, self.timeout()).map(|_| ())
    }

    fn refresh_hwdb(&self) -> Result<()> {
        process::run_argv(&self.config.hwdb_refresh, self.timeout()).map(|_| ())
    }

    fn trigger_archive(&self) -> Result<()> {
        process::run_argv(&self.config.archive, self.timeout()).map(|_| ())
    }
}

/// Non-fatal steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Branding,
    HwdbRefresh,
    Archive,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branding => write!(f, "branding"),
            Self::HwdbRefresh => write!(f, "hardware database refresh"),
            Self::Archive => write!(f, "archival trigger"),
        }
    }
}

/// A failed non-fatal step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub step: Step,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub installed: Vec<(String, Resolution)>,
    pub store: PersistentStore,
    /// Manifest entries added by this run, in insertion order
    pub manifest_added: Vec<String>,
    pub extension: Option<Extension>,
    pub warnings: Vec<Warning>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Sequences one provisioning pass
pub struct Orchestrator<'a, B, F, D, H>
where
    B: PackageBackend,
    F: Fetcher,
    D: BlockDevices,
    H: SystemHooks,
{
    config: &'a ProvisionConfig,
    mirrors: &'a MirrorSet,
    backend: &'a B,
    fetcher: &'a F,
    devices: &'a D,
    hooks: &'a H,
    skip_preflight: bool,
}

impl<'a, B, F, D, H> Orchestrator<'a, B, F, D, H>
where
    B: PackageBackend,
    F: Fetcher,
    D: BlockDevices,
    H: SystemHooks,
{
    pub fn new(
        config: &'a ProvisionConfig,
        mirrors: &'a MirrorSet,
        backend: &'a B,
        fetcher: &'a F,
        devices: &'a D,
        hooks: &'a H,
    ) -> Self {
        Self {
            config,
            mirrors,
            backend,
            fetcher,
            devices,
            hooks,
            skip_preflight: false,
        }
    }

    pub fn skip_preflight(mut self, skip: bool) -> Self {
        self.skip_preflight = skip;
        self
    }

    /// Run every step; the first fatal error ends the run
    pub fn run(&self) -> Result<RunReport> {
        let section = &self.config.provision;

        if self.skip_preflight {
            warn!("Skipping preflight checks");
        } else {
            self.hooks.preflight(self.mirrors)?;
        }

        fs::create_dir_all(&section.scratch_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create scratch directory {}: {}",
                section.scratch_dir.display(),
                e
            ))
        })?;

        let mut manifest = PersistenceManifest::open(&section.manifest)?;
        let prior_entries = manifest.entries().len();

        let names = NameResolver::new(self.config.alternates.clone());
        let resolver = DependencyResolver::new(
            self.backend,
            self.fetcher,
            &names,
            self.mirrors,
            &section.scratch_dir,
        )
        .keep_artifacts_in(section.staging_dir());
        let installed = resolver.ensure_all(&section.packages, &mut manifest)?;

        let extension = self.prepare_payload()?;

        let store = StorageLocator::new(
            self.devices,
            &section.mount_root,
            section.store_dir.as_str(),
            section.min_free_kb,
        )
        .locate_or_create_store()?;

        manifest.ensure_persisted(&store.path)?;
        if extension.is_some() {
            manifest.ensure_persisted(&section.bootlocal)?;
        }
        for path in &section.persist {
            manifest.ensure_persisted(path)?;
        }

        let mut onboot = OnbootList::open(store.onboot_list())?;
        let staging = section.staging_dir();
        for (_, resolution) in &installed {
            let name = resolution.installed_name();
            if self.stock_package(name, &staging, &store)? {
                onboot.register(name)?;
            } else {
                warn!("No local copy of {}.tcz; it will not be loaded at boot", name);
            }
        }
        clear_staging(&staging);
        if let Some(extension) = &extension {
            payload::install_extension(extension, &store, &mut onboot)?;
        }

        let warnings = self.finish();
        for warning in &warnings {
            warn!("{}", warning);
        }

        info!(
            "Provisioning complete: {} package(s), store {}",
            installed.len(),
            store.path.display()
        );
        Ok(RunReport {
            installed,
            store,
            manifest_added: manifest.entries()[prior_entries..].to_vec(),
            extension,
            warnings,
        })
    }

    fn prepare_payload(&self) -> Result<Option<Extension>> {
        let Some(app) = &self.config.application else {
            return Ok(None);
        };
        let scratch = &self.config.provision.scratch_dir;

        let package_dir = payload::fetch_application(app, self.fetcher, scratch)?;
        let extension = payload::build_extension(app, &package_dir, scratch, |src, dest| {
            self.hooks.build_extension(src, dest)
        })?;
        payload::register_autostart(&self.config.provision.bootlocal, &app.launch)?;
        Ok(Some(extension))
    }

    /// Make sure `<store>/optional/<name>.tcz` exists
    ///
    /// Checked in order:
    ///
    /// 1. a copy already in the store
    /// 2. the artifact kept from a direct fetch
    /// 3. the platform's download cache
    ///
    /// Returns `false` when there is nothing to copy.
    fn stock_package(&self, name: &str, staging: &Path, store: &PersistentStore) -> Result<bool> {
        let file_name = format!("{}.tcz", name);
        let optional = store.optional_dir();
        let target = optional.join(&file_name);
        if target.is_file() {
            return Ok(true);
        }

        let staged = staging.join(&file_name);
        let source = if staged.is_file() {
            staged
        } else {
            match self.backend.cached_artifact(name) {
                Some(path) => path,
                None => return Ok(false),
            }
        };

        fs::create_dir_all(&optional).map_err(|e| {
            Error::IoError(format!("Failed to create {}: {}", optional.display(), e))
        })?;
        fs::copy(&source, &target).map_err(|e| {
            Error::IoError(format!(
                "Failed to copy {} to {}: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;
        info!("Stored {} in {}", file_name, optional.display());
        Ok(true)
    }

    /// Steps whose failure is reported but never aborts the run
    fn finish(&self) -> Vec<Warning> {
        let mut warnings = Vec::new();

        for rule in &self.config.branding {
            if let Err(e) = payload::apply_branding(rule) {
                warnings.push(Warning {
                    step: Step::Branding,
                    message: e.to_string(),
                });
            }
        }

        if let Err(e) = self.hooks.refresh_hwdb() {
            warnings.push(Warning {
                step: Step::HwdbRefresh,
                message: e.to_string(),
            });
        }

        if let Err(e) = self.hooks.trigger_archive() {
            warnings.push(Warning {
                step: Step::Archive,
                message: e.to_string(),
            });
        }

        warnings
    }
}

fn clear_staging(staging: &Path) {
    match fs::remove_dir_all(staging) {
        Ok(()) => debug!("Removed {}", staging.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", staging.display(), e),
    }
}
