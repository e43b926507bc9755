// src/commands.rs
//! Command handlers for the tinyprov CLI

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use tinyprov::{
    DependencyResolver, HttpFetcher, LinuxBlockDevices, LiveHooks, MirrorSet, NameResolver,
    Orchestrator, PersistenceManifest, Platform, ProvisionConfig, StorageLocator, SystemHooks,
    TceBackend,
};
use tracing::{info, warn};

use crate::cli::Cli;

/// Load the config file, or the built-in defaults when it is absent
pub fn load_config(path: &Path) -> Result<ProvisionConfig> {
    let config = ProvisionConfig::load(Some(path))
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(config)
}

fn mirror_set(config: &ProvisionConfig) -> Result<MirrorSet> {
    let platform = Platform::detect(config.provision.release.as_deref())?;
    info!("Detected platform {} {}", platform.major, platform.arch);
    Ok(MirrorSet::for_platform(&config.mirrors, &platform)?)
}

fn backend(config: &ProvisionConfig) -> TceBackend {
    if !TceBackend::available() {
        warn!("tce-load not found on PATH; managed installs will fail");
    }
    TceBackend::new(config.managed_timeout())
}

/// Full provisioning pass
pub fn cmd_run(config: &ProvisionConfig, skip_preflight: bool) -> Result<()> {
    let mirrors = mirror_set(config)?;
    let backend = backend(config);
    let fetcher = HttpFetcher::new(config.fetch_timeout())?;
    let devices = LinuxBlockDevices::new();
    let hooks = LiveHooks::new(config.hooks.clone(), config.fetch_timeout())?;

    let report = Orchestrator::new(config, &mirrors, &backend, &fetcher, &devices, &hooks)
        .skip_preflight(skip_preflight)
        .run()?;

    println!("Installed packages:");
    for (name, resolution) in &report.installed {
        println!("  {:<20} {}", name, resolution);
    }
    if let Some(extension) = &report.extension {
        println!("Application: {} ({} KB)", extension.name, extension.size_kb);
    }
    println!(
        "Persistent store: {} ({} KB free)",
        report.store.path.display(),
        report.store.free_kb
    );
    if report.manifest_added.is_empty() {
        println!("Manifest unchanged");
    } else {
        println!("Added to manifest:");
        for entry in &report.manifest_added {
            println!("  {}", entry);
        }
    }
    if !report.is_clean() {
        println!("Completed with {} warning(s):", report.warnings.len());
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }
    Ok(())
}

/// Resolve only the named packages
pub fn cmd_install(config: &ProvisionConfig, names: &[String], skip_preflight: bool) -> Result<()> {
    let mirrors = mirror_set(config)?;
    if !skip_preflight {
        LiveHooks::new(config.hooks.clone(), config.fetch_timeout())?.preflight(&mirrors)?;
    }

    std::fs::create_dir_all(&config.provision.scratch_dir).with_context(|| {
        format!(
            "Failed to create scratch directory {}",
            config.provision.scratch_dir.display()
        )
    })?;

    let backend = backend(config);
    let fetcher = HttpFetcher::new(config.fetch_timeout())?;
    let resolver_names = NameResolver::new(config.alternates.clone());
    let resolver = DependencyResolver::new(
        &backend,
        &fetcher,
        &resolver_names,
        &mirrors,
        &config.provision.scratch_dir,
    )
    .keep_artifacts_in(config.provision.staging_dir());

    let mut manifest = PersistenceManifest::open(&config.provision.manifest)?;
    for (name, resolution) in resolver.ensure_all(names, &mut manifest)? {
        println!("{}: {}", name, resolution);
    }
    Ok(())
}

/// Locate or create the persistent store
pub fn cmd_store(config: &ProvisionConfig) -> Result<()> {
    let devices = LinuxBlockDevices::new();
    let section = &config.provision;
    let store = StorageLocator::new(
        &devices,
        &section.mount_root,
        section.store_dir.as_str(),
        section.min_free_kb,
    )
    .locate_or_create_store()?;

    println!("{}", store.path.display());
    if let Some(device) = &store.device {
        println!("  device:      {}", device);
    }
    println!("  mount point: {}", store.mount_point.display());
    println!("  free:        {} KB", store.free_kb);
    Ok(())
}

/// Record paths in the manifest
pub fn cmd_persist(config: &ProvisionConfig, paths: &[PathBuf]) -> Result<()> {
    let mut manifest = PersistenceManifest::open(&config.provision.manifest)?;
    for path in paths {
        if manifest.ensure_persisted(path)? {
            println!("Added {}", path.display());
        } else {
            println!("Already persisted: {}", path.display());
        }
    }
    Ok(())
}

/// Print manifest entries in insertion order
pub fn cmd_manifest(config: &ProvisionConfig) -> Result<()> {
    let manifest = PersistenceManifest::open(&config.provision.manifest)?;
    for entry in manifest.entries() {
        println!("{}", entry);
    }
    Ok(())
}

/// Print the mirror set for this platform
pub fn cmd_mirrors(config: &ProvisionConfig) -> Result<()> {
    for mirror in mirror_set(config)?.iter() {
        println!("{}", mirror);
    }
    Ok(())
}

pub fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "tinyprov", &mut std::io::stdout().lock());
    Ok(())
}
