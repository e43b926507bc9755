// src/repository/mod.rs

//! Mirrors and artifact fetching
//!
//! This module provides:
//! - The ordered mirror set computed once from the detected platform
//! - The [`Fetcher`] seam used by the resolver for direct downloads
//! - A blocking HTTP fetcher with a bounded per-attempt timeout

mod client;

pub use client::HttpFetcher;

use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::platform::Platform;
use std::path::Path;
use url::Url;

/// Downloads one URL to one file
pub trait Fetcher {
    /// Returns the number of bytes written to `dest`
    fn fetch(&self, url: &Url, dest: &Path) -> Result<u64>;
}

/// Ordered, immutable list of repository locations for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSet {
    mirrors: Vec<Url>,
}

impl MirrorSet {
    /// Build from explicit repository URLs (each a directory of artifacts)
    pub fn from_urls<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mirrors = Vec::new();
        for url in urls {
            let parsed = parse_dir_url(url.as_ref())?;
            if !mirrors.contains(&parsed) {
                mirrors.push(parsed);
            }
        }
        if mirrors.is_empty() {
            return Err(Error::ConfigError("No mirrors configured".to_string()));
        }
        Ok(Self { mirrors })
    }

    /// Compute `<base>/<major>.x/<arch>/tcz/` for every configured base
    pub fn for_platform(config: &MirrorConfig, platform: &Platform) -> Result<Self> {
        let repo_path = platform.repo_path();
        let urls: Vec<String> = config
            .bases_for(platform.arch.repo_dir())
            .iter()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), repo_path))
            .collect();
        Self::from_urls(urls)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.mirrors.iter()
    }

    /// First mirror, used for the reachability check
    pub fn primary(&self) -> &Url {
        &self.mirrors[0]
    }
}

/// Location of `<name>.tcz` on a mirror
pub fn artifact_url(mirror: &Url, name: &str) -> Result<Url> {
    mirror
        .join(&format!("{}.tcz", name))
        .map_err(|e| Error::ParseError(format!("Invalid artifact URL for {}: {}", name, e)))
}

fn parse_dir_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash)
        .map_err(|e| Error::ConfigError(format!("Invalid mirror URL '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Arch;
    use std::collections::HashMap;

    #[test]
    fn test_mirror_set_for_platform() {
        let config = MirrorConfig {
            bases: vec![
                "http://m1.example".to_string(),
                "http://m2.example/tinycorelinux/".to_string(),
            ],
            platform: HashMap::new(),
        };
        let platform = Platform::new("15.0", Arch::X86_64).unwrap();
        let set = MirrorSet::for_platform(&config, &platform).unwrap();

        let urls: Vec<&str> = set.iter().map(|u| u.as_str()).collect();
        assert_eq!(
            urls,
            [
                "http://m1.example/15.x/x86_64/tcz/",
                "http://m2.example/tinycorelinux/15.x/x86_64/tcz/",
            ]
        );
    }

    #[test]
    fn test_platform_override() {
        let mut platform_bases = HashMap::new();
        platform_bases.insert("armv7".to_string(), vec!["http://arm.example".to_string()]);
        let config = MirrorConfig {
            bases: vec!["http://m1.example".to_string()],
            platform: platform_bases,
        };
        let platform = Platform::new("14.0", Arch::Armv7).unwrap();
        let set = MirrorSet::for_platform(&config, &platform).unwrap();
        assert_eq!(set.iter().count(), 1);
        assert_eq!(set.primary().as_str(), "http://arm.example/14.x/armv7/tcz/");
    }

    #[test]
    fn test_duplicate_mirrors_collapsed() {
        let set = MirrorSet::from_urls(["http://m1.example/a", "http://m1.example/a/"]).unwrap();
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn test_empty_and_invalid_mirrors() {
        assert!(MirrorSet::from_urls(Vec::<String>::new()).is_err());
        assert!(MirrorSet::from_urls(["not a url"]).is_err());
    }

    #[test]
    fn test_artifact_url() {
        let set = MirrorSet::from_urls(["http://m1.example/15.x/x86/tcz"]).unwrap();
        let url = artifact_url(set.primary(), "python3.9").unwrap();
        assert_eq!(url.as_str(), "http://m1.example/15.x/x86/tcz/python3.9.tcz");
    }
}
