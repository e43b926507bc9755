// src/payload.rs

//! Application payload packaging
//!
//! The downstream application ships as a Tiny Core extension:
//!
//! ```text
//! <scratch>/<name>/usr/local/bin/<name>     downloaded file, mode 0755
//! <scratch>/<name>.tcz                      squashed package directory
//! <scratch>/<name>.tcz.dep                  one dependency per line
//! <scratch>/<name>.tcz.info                 Title/Description/Version/Author/Size
//! ```
//!
//! Once the persistent store is known the three files are copied into
//! `<store>/optional` and the extension is registered in `onboot.lst`.

use crate::config::{ApplicationConfig, BrandingRule};
use crate::error::{Error, Result};
use crate::manifest::OnbootList;
use crate::repository::Fetcher;
use crate::storage::PersistentStore;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

const EXECUTABLE_MODE: u32 = 0o755;

/// A built extension and its metadata files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub name: String,
    pub archive: PathBuf,
    pub dep_file: PathBuf,
    pub info_file: PathBuf,
    pub size_kb: u64,
}

impl Extension {
    fn files(&self) -> [&Path; 3] {
        [
            self.archive.as_path(),
            self.dep_file.as_path(),
            self.info_file.as_path(),
        ]
    }
}

/// Download the application into its package directory
///
/// Returns the package directory root. Unlike package artifacts there is no
/// fallback source, so any failure is final.
pub fn fetch_application<F: Fetcher>(
    app: &ApplicationConfig,
    fetcher: &F,
    scratch_dir: &Path,
) -> Result<PathBuf> {
    let url = Url::parse(&app.url).map_err(|e| {
        Error::ConfigError(format!("Invalid application URL '{}': {}", app.url, e))
    })?;

    let package_dir = scratch_dir.join(&app.name);
    let bin_dir = package_dir.join("usr/local/bin");
    fs::create_dir_all(&bin_dir).map_err(|e| {
        Error::IoError(format!("Failed to create {}: {}", bin_dir.display(), e))
    })?;

    let target = bin_dir.join(&app.name);
    let written = fetcher.fetch(&url, &target).map_err(|e| match e {
        Error::TransientFetch(msg) => Error::DownloadError(msg),
        other => other,
    })?;
    if written == 0 {
        return Err(Error::DownloadError(format!("{} returned an empty body", url)));
    }

    fs::set_permissions(&target, fs::Permissions::from_mode(EXECUTABLE_MODE))?;
    info!("Fetched {} ({} bytes) to {}", app.name, written, target.display());
    Ok(package_dir)
}

/// Squash `package_dir` into `<out_dir>/<name>.tcz` and write its metadata
///
/// `squash` receives the package directory and the archive path to produce.
pub fn build_extension<S>(
    app: &ApplicationConfig,
    package_dir: &Path,
    out_dir: &Path,
    squash: S,
) -> Result<Extension>
where
    S: FnOnce(&Path, &Path) -> Result<()>,
{
    fs::create_dir_all(out_dir)?;
    let archive = out_dir.join(format!("{}.tcz", app.name));

    squash(package_dir, &archive)?;

    let size_kb = fs::metadata(&archive)
        .map_err(|e| {
            Error::IoError(format!(
                "Extension archive {} was not produced: {}",
                archive.display(),
                e
            ))
        })?
        .len()
        / 1024;

    let dep_file = out_dir.join(format!("{}.tcz.dep", app.name));
    fs::write(&dep_file, render_dep(&app.depends))?;

    let info_file = out_dir.join(format!("{}.tcz.info", app.name));
    fs::write(&info_file, render_info(app, size_kb))?;

    info!("Built extension {} ({} KB)", archive.display(), size_kb);
    Ok(Extension {
        name: app.name.clone(),
        archive,
        dep_file,
        info_file,
        size_kb,
    })
}

fn render_dep(depends: &[String]) -> String {
    depends
        .iter()
        .map(|d| {
            if d.ends_with(".tcz") {
                format!("{}\n", d)
            } else {
                format!("{}.tcz\n", d)
            }
        })
        .collect()
}

fn render_info(app: &ApplicationConfig, size_kb: u64) -> String {
    format!(
        "Title: {name}.tcz\nDescription: {desc}\nVersion: {version}\nAuthor: {author}\nSize: {size_kb}K\n",
        name = app.name,
        desc = app.description.as_deref().unwrap_or(&app.name),
        version = app.version,
        author = app.author.as_deref().unwrap_or("unknown"),
    )
}

/// Append `launch` to the boot script unless an identical line exists
///
/// A missing script is created with a shebang. Returns `true` when the line
/// was added.
pub fn register_autostart(bootlocal: &Path, launch: &str) -> Result<bool> {
    let launch = launch.trim();
    if launch.is_empty() {
        return Err(Error::ConfigError("Launch command is empty".to_string()));
    }

    let existing = match fs::read_to_string(bootlocal) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(Error::IoError(format!(
                "Failed to read {}: {}",
                bootlocal.display(),
                e
            )));
        }
    };

    if let Some(content) = &existing {
        if content.lines().any(|line| line.trim() == launch) {
            debug!("Launch line already present in {}", bootlocal.display());
            return Ok(false);
        }
    }

    if let Some(parent) = bootlocal.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(bootlocal)?;
    match &existing {
        None => {
            write!(file, "#!/bin/sh\n{}\n", launch)?;
            fs::set_permissions(bootlocal, fs::Permissions::from_mode(EXECUTABLE_MODE))?;
        }
        Some(content) if !content.is_empty() && !content.ends_with('\n') => {
            write!(file, "\n{}\n", launch)?;
        }
        Some(_) => writeln!(file, "{}", launch)?,
    }

    info!("Registered autostart in {}", bootlocal.display());
    Ok(true)
}

/// Copy the extension into the store and load it at boot
pub fn install_extension(
    extension: &Extension,
    store: &PersistentStore,
    onboot: &mut OnbootList,
) -> Result<()> {
    let optional = store.optional_dir();
    fs::create_dir_all(&optional).map_err(|e| {
        Error::IoError(format!("Failed to create {}: {}", optional.display(), e))
    })?;

    for file in extension.files() {
        let file_name = file
            .file_name()
            .ok_or_else(|| Error::InvalidPath(file.display().to_string()))?;
        let target = optional.join(file_name);
        fs::copy(file, &target).map_err(|e| {
            Error::IoError(format!(
                "Failed to copy {} to {}: {}",
                file.display(),
                target.display(),
                e
            ))
        })?;
        debug!("Copied {} to {}", file.display(), target.display());
    }

    onboot.register(&extension.name)?;
    Ok(())
}

/// Replace every occurrence of `from` with `to` in the rule's file
///
/// Returns `false` when the file did not contain the text.
pub fn apply_branding(rule: &BrandingRule) -> Result<bool> {
    let content = fs::read_to_string(&rule.file).map_err(|e| {
        Error::IoError(format!("Failed to read {}: {}", rule.file.display(), e))
    })?;
    if rule.from.is_empty() || !content.contains(&rule.from) {
        return Ok(false);
    }

    fs::write(&rule.file, content.replace(&rule.from, &rule.to)).map_err(|e| {
        Error::IoError(format!("Failed to write {}: {}", rule.file.display(), e))
    })?;
    info!("Rebranded {}", rule.file.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFetcher(&'static str);

    impl Fetcher for StaticFetcher {
        fn fetch(&self, _url: &Url, dest: &Path) -> Result<u64> {
            fs::write(dest, self.0)?;
            Ok(self.0.len() as u64)
        }
    }

    fn app() -> ApplicationConfig {
        ApplicationConfig {
            name: "desktop".to_string(),
            url: "http://apps.example/desktop.py".to_string(),
            launch: "python3 /usr/local/bin/desktop &".to_string(),
            depends: vec!["python3.9".to_string(), "tk.tcz".to_string()],
            version: "2.1".to_string(),
            description: Some("Desktop shell".to_string()),
            author: None,
        }
    }

    #[test]
    fn test_fetch_application_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = fetch_application(&app(), &StaticFetcher("print('hi')"), temp_dir.path()).unwrap();

        let bin = dir.join("usr/local/bin/desktop");
        assert_eq!(fs::read_to_string(&bin).unwrap(), "print('hi')");
        let mode = fs::metadata(&bin).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_fetch_application_empty_body() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = fetch_application(&app(), &StaticFetcher(""), temp_dir.path());
        assert!(matches!(result, Err(Error::DownloadError(_))));
    }

    #[test]
    fn test_build_extension_metadata() {
        let temp_dir = tempfile::tempdir().unwrap();
        let package_dir = temp_dir.path().join("desktop");
        fs::create_dir_all(&package_dir).unwrap();

        let ext = build_extension(&app(), &package_dir, temp_dir.path(), |src, out| {
            assert_eq!(src, package_dir.as_path());
            fs::write(out, vec![0u8; 4096])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(ext.size_kb, 4);
        assert_eq!(
            fs::read_to_string(&ext.dep_file).unwrap(),
            "python3.9.tcz\ntk.tcz\n"
        );
        let info = fs::read_to_string(&ext.info_file).unwrap();
        assert!(info.contains("Title: desktop.tcz\n"));
        assert!(info.contains("Description: Desktop shell\n"));
        assert!(info.contains("Version: 2.1\n"));
        assert!(info.contains("Size: 4K\n"));
    }

    #[test]
    fn test_build_extension_requires_archive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = build_extension(&app(), temp_dir.path(), temp_dir.path(), |_, _| Ok(()));
        assert!(matches!(result, Err(Error::IoError(_))));
    }

    #[test]
    fn test_register_autostart_creates_and_dedups() {
        let temp_dir = tempfile::tempdir().unwrap();
        let bootlocal = temp_dir.path().join("opt/bootlocal.sh");

        assert!(register_autostart(&bootlocal, "desktop &").unwrap());
        assert!(!register_autostart(&bootlocal, "desktop &").unwrap());
        assert_eq!(
            fs::read_to_string(&bootlocal).unwrap(),
            "#!/bin/sh\ndesktop &\n"
        );
    }

    #[test]
    fn test_register_autostart_appends_after_unterminated_line() {
        let temp_dir = tempfile::tempdir().unwrap();
        let bootlocal = temp_dir.path().join("bootlocal.sh");
        fs::write(&bootlocal, "#!/bin/sh\n/usr/sbin/startserialtty &").unwrap();

        assert!(register_autostart(&bootlocal, "desktop &").unwrap());
        assert_eq!(
            fs::read_to_string(&bootlocal).unwrap(),
            "#!/bin/sh\n/usr/sbin/startserialtty &\ndesktop &\n"
        );
    }

    #[test]
    fn test_install_extension_copies_and_registers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let build = temp_dir.path().join("build");
        let ext = build_extension(&app(), &build, &build, |_, out| {
            fs::write(out, b"hsqs")?;
            Ok(())
        })
        .unwrap();

        let store = PersistentStore {
            path: temp_dir.path().join("sda1/tce"),
            mount_point: temp_dir.path().join("sda1"),
            device: None,
            free_kb: 50_000,
        };
        let mut onboot = OnbootList::open(store.onboot_list()).unwrap();
        install_extension(&ext, &store, &mut onboot).unwrap();
        install_extension(&ext, &store, &mut onboot).unwrap();

        for name in ["desktop.tcz", "desktop.tcz.dep", "desktop.tcz.info"] {
            assert!(store.optional_dir().join(name).exists());
        }
        assert_eq!(onboot.entries(), ["desktop.tcz"]);
    }

    #[test]
    fn test_apply_branding() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("issue");
        fs::write(&file, "Welcome to Tiny Core\n").unwrap();

        let rule = BrandingRule {
            file: file.clone(),
            from: "Tiny Core".to_string(),
            to: "Desk".to_string(),
        };
        assert!(apply_branding(&rule).unwrap());
        assert!(!apply_branding(&rule).unwrap());
        assert_eq!(fs::read_to_string(&file).unwrap(), "Welcome to Desk\n");

        let missing = BrandingRule {
            file: temp_dir.path().join("absent"),
            ..rule
        };
        assert!(apply_branding(&missing).is_err());
    }
}
