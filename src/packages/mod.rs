// src/packages/mod.rs

//! Local package state and candidate name expansion
//!
//! The resolver never talks to the package tools directly; it goes through
//! [`PackageBackend`] so the fallback policy can be tested without a live
//! system.

mod tce;

pub use tce::TceBackend;

use crate::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Local package database and installer
pub trait PackageBackend {
    /// Query install state; never cached by callers
    fn is_installed(&self, name: &str) -> bool;

    /// Install through the platform's own package index
    fn managed_install(&self, name: &str) -> bool;

    /// Install from a downloaded artifact
    fn install_artifact(&self, artifact: &Path) -> Result<()>;

    /// File that represents an installed package in the persistence manifest
    fn representative_path(&self, name: &str) -> PathBuf;

    /// Artifact the platform kept locally for an installed package
    fn cached_artifact(&self, _name: &str) -> Option<PathBuf> {
        None
    }
}

/// Expands a logical package name into concrete names to try
#[derive(Debug, Clone, Default)]
pub struct NameResolver {
    alternates: HashMap<String, Vec<String>>,
}

impl NameResolver {
    pub fn new(alternates: HashMap<String, Vec<String>>) -> Self {
        Self { alternates }
    }

    /// Logical name first, then its declared fallbacks, without repeats
    pub fn candidates(&self, logical_name: &str) -> Vec<String> {
        let mut names = vec![logical_name.to_string()];
        if let Some(extra) = self.alternates.get(logical_name) {
            for name in extra {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }
}
