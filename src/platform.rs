// src/platform.rs

//! Platform detection for mirror selection
//!
//! The repository layout is `<base>/<major>.x/<arch>/tcz/`, so the mirror set
//! depends on the OS release and the CPU architecture.

use crate::error::{Error, Result};
use std::path::Path;
use tracing::debug;

/// Release file shipped by the base image
pub const RELEASE_FILE: &str = "/usr/share/doc/tc/release.txt";

/// Repository architecture directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// 32-bit x86
    X86,
    /// x86_64 / AMD64
    X86_64,
    /// 32-bit ARM (Raspberry Pi builds)
    Armv7,
    /// AArch64 / ARM64
    Aarch64,
}

impl Arch {
    /// Directory name used by the repository
    pub fn repo_dir(&self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
            Self::Armv7 => "armv7",
            Self::Aarch64 => "aarch64",
        }
    }

    /// Parse a `uname -m` style machine string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "x86_64" | "amd64" => Some(Self::X86_64),
            "i386" | "i486" | "i586" | "i686" | "x86" => Some(Self::X86),
            "armv6l" | "armv7l" | "armv7" => Some(Self::Armv7),
            "aarch64" | "arm64" => Some(Self::Aarch64),
            _ => None,
        }
    }

    /// Architecture of the running kernel
    pub fn detect() -> Result<Self> {
        let uts = nix::sys::utsname::uname()
            .map_err(|e| Error::Preflight(format!("uname failed: {}", e)))?;
        let machine = uts.machine().to_string_lossy().into_owned();
        Self::parse(&machine)
            .ok_or_else(|| Error::Preflight(format!("Unsupported architecture: {}", machine)))
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.repo_dir())
    }
}

/// Detected platform: release series plus architecture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Major release number, e.g. "15"
    pub major: String,
    pub arch: Arch,
}

impl Platform {
    pub fn new(release: &str, arch: Arch) -> Result<Self> {
        Ok(Self {
            major: parse_major(release)?,
            arch,
        })
    }

    /// Detect from the running system, honoring a configured release override
    pub fn detect(release_override: Option<&str>) -> Result<Self> {
        let release = match release_override {
            Some(r) => r.to_string(),
            None => read_release(Path::new(RELEASE_FILE))?,
        };
        let platform = Self::new(&release, Arch::detect()?)?;
        debug!("Detected platform {}.x/{}", platform.major, platform.arch);
        Ok(platform)
    }

    /// Path appended to every mirror base
    pub fn repo_path(&self) -> String {
        format!("{}.x/{}/tcz/", self.major, self.arch.repo_dir())
    }
}

/// Read the first non-empty line of the release file
pub fn read_release(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Preflight(format!("Cannot read release file {}: {}", path.display(), e))
    })?;
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::ParseError(format!("Empty release file {}", path.display())))
}

fn parse_major(release: &str) -> Result<String> {
    let major = release.trim().split('.').next().unwrap_or("");
    if major.is_empty() || !major.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::ParseError(format!(
            "Invalid release version: '{}'",
            release
        )));
    }
    Ok(major.to_string())
}
