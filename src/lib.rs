// src/lib.rs

//! tinyprov
//!
//! Provisioner for Tiny Core style live-boot systems: installs a declared
//! package set, finds or creates a persistent store on a block device, and
//! records every path that must survive a reboot.
//!
//! # Architecture
//!
//! - Resolution: managed install first, then candidate names x mirrors
//! - Storage: reuse an existing store, otherwise mount and create one
//! - Manifest: one order-preserving, deduplicated list of persisted paths
//! - Orchestration: fixed step order, fatal errors map to exit codes
//!
//! External capabilities (package backend, network, block devices, system
//! commands) sit behind traits so each component runs against fakes in tests.

pub mod config;
mod error;
pub mod manifest;
pub mod orchestrator;
pub mod packages;
pub mod payload;
pub mod platform;
pub mod process;
pub mod repository;
pub mod resolver;
pub mod storage;

pub use config::{ProvisionConfig, DEFAULT_CONFIG_PATH};
pub use error::{Error, Result};
pub use manifest::{OnbootList, PersistenceManifest};
pub use orchestrator::{LiveHooks, Orchestrator, RunReport, Step, SystemHooks, Warning};
pub use packages::{NameResolver, PackageBackend, TceBackend};
pub use platform::{Arch, Platform};
pub use repository::{Fetcher, HttpFetcher, MirrorSet};
pub use resolver::{DependencyResolver, Resolution};
pub use storage::{BlockDevices, LinuxBlockDevices, PersistentStore, StorageLocator};
