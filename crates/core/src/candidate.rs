//! Build candidates and on-disk application layouts

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IrisError, IrisResult};
use crate::platform::{BuildPlatform, Platform};

/// How a candidate was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    ReleaseDownload,
    LocalArchive,
    LocalBuildTree,
    LocalInstallation,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provenance::ReleaseDownload => "release download",
            Provenance::LocalArchive => "local archive",
            Provenance::LocalBuildTree => "local build tree",
            Provenance::LocalInstallation => "local installation",
        })
    }
}

/// The resolved, runnable Firefox under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Absolute path of the Firefox executable
    pub executable_path: PathBuf,

    /// Version from `application.ini`, empty when unknown
    pub version: String,

    /// Build ID from `application.ini`, empty when unknown
    pub build_id: String,

    pub platform_tag: BuildPlatform,

    pub provenance: Provenance,

    /// What the build came from: the user's reference, a file path, a build
    /// tree path or the resolved download URL
    pub origin_reference: String,
}

impl Candidate {
    pub fn new(layout: AppLayout, provenance: Provenance, origin_reference: impl Into<String>) -> Self {
        Self {
            executable_path: layout.executable_path,
            version: layout.version,
            build_id: layout.build_id,
            platform_tag: layout.platform_tag,
            provenance,
            origin_reference: origin_reference.into(),
        }
    }
}

/// An application directory as found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLayout {
    pub executable_path: PathBuf,
    pub version: String,
    pub build_id: String,
    pub platform_tag: BuildPlatform,
}

impl AppLayout {
    /// Locate the Firefox executable below `base` and read its metadata.
    ///
    /// Layouts of every platform are recognised regardless of the host, so a
    /// foreign build still resolves and can be reported as a mismatch.
    pub fn inspect(base: &Path) -> IrisResult<Self> {
        let (family, executable) =
            locate_executable(base).ok_or_else(|| IrisError::ExecutableNotFound(base.to_path_buf()))?;
        let executable_path = std::fs::canonicalize(&executable)?;

        let app_info = find_application_ini(&executable_path, family)
            .and_then(|ini| std::fs::read_to_string(ini).ok())
            .map(|content| parse_ini_section(&content, "App"))
            .unwrap_or_default();

        let layout = Self {
            executable_path,
            version: app_info.get("Version").cloned().unwrap_or_default(),
            build_id: app_info.get("BuildID").cloned().unwrap_or_default(),
            platform_tag: BuildPlatform::for_family(family),
        };
        debug!(
            "Found {} build at {} (version \"{}\", build id \"{}\")",
            family,
            layout.executable_path.display(),
            layout.version,
            layout.build_id
        );
        Ok(layout)
    }
}

fn locate_executable(base: &Path) -> Option<(Platform, PathBuf)> {
    let mac = [
        base.join("Contents/MacOS/firefox"),
        base.join("MacOS/firefox"),
    ]
    .into_iter()
    .chain(app_bundles(base).map(|app| app.join("Contents/MacOS/firefox")))
    .chain(
        // Packaged disk images carry the bundle one directory further down.
        subdirs(base)
            .flat_map(|dir| app_bundles(&dir).collect::<Vec<_>>())
            .map(|app| app.join("Contents/MacOS/firefox")),
    )
    .map(|p| (Platform::Mac, p));

    let windows = ["firefox.exe", "core/firefox.exe", "firefox/firefox.exe", "bin/firefox.exe"]
        .into_iter()
        .map(|rel| (Platform::Windows, base.join(rel)));

    let linux = ["firefox", "firefox/firefox", "bin/firefox"]
        .into_iter()
        .map(|rel| (Platform::Linux, base.join(rel)));

    mac.chain(windows)
        .chain(linux)
        .find(|(_, path)| is_executable(path))
}

fn subdirs(dir: &Path) -> impl Iterator<Item = PathBuf> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs.into_iter()
}

fn app_bundles(dir: &Path) -> impl Iterator<Item = PathBuf> {
    subdirs(dir).filter(|p| p.extension().map(|e| e == "app").unwrap_or(false))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn find_application_ini(executable: &Path, family: Platform) -> Option<PathBuf> {
    let dir = executable.parent()?;
    let mut candidates = vec![dir.join("application.ini")];
    if family == Platform::Mac {
        if let Some(contents) = dir.parent() {
            candidates.push(contents.join("Resources/application.ini"));
        }
    }
    candidates.into_iter().find(|p| p.is_file())
}

/// Key/value pairs of one `[section]` of an ini file
pub fn parse_ini_section(content: &str, section: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let mut in_section = false;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_section = name.trim() == section;
            continue;
        }
        if in_section {
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    const APPLICATION_INI: &str = "\
; comment
[App]
Vendor=Mozilla
Name=Firefox
Version=63.0a1
BuildID=20180810100129

[Gecko]
Version=63.0a1
";

    fn write_exe(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    #[test]
    fn parses_app_section_only() {
        let app = parse_ini_section(APPLICATION_INI, "App");
        assert_eq!(app.get("Version").map(String::as_str), Some("63.0a1"));
        assert_eq!(app.get("BuildID").map(String::as_str), Some("20180810100129"));
        assert_eq!(app.len(), 4);
    }

    #[test]
    fn inspects_linux_package_layout() {
        let dir = tempfile::tempdir().unwrap();
        write_exe(&dir.path().join("firefox/firefox"));
        std::fs::write(dir.path().join("firefox/application.ini"), APPLICATION_INI).unwrap();

        let layout = AppLayout::inspect(dir.path()).unwrap();
        assert!(layout.executable_path.ends_with("firefox/firefox"));
        assert!(layout.executable_path.is_absolute());
        assert_eq!(layout.version, "63.0a1");
        assert_eq!(layout.platform_tag.family(), Platform::Linux);
    }

    #[test]
    fn inspects_nested_mac_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let contents = dir.path().join("Firefox/Firefox.app/Contents");
        write_exe(&contents.join("MacOS/firefox"));
        std::fs::create_dir_all(contents.join("Resources")).unwrap();
        std::fs::write(contents.join("Resources/application.ini"), APPLICATION_INI).unwrap();

        let layout = AppLayout::inspect(dir.path()).unwrap();
        assert_eq!(layout.platform_tag, BuildPlatform::Osx);
        assert_eq!(layout.build_id, "20180810100129");
    }

    #[test]
    fn missing_metadata_leaves_version_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_exe(&dir.path().join("core/firefox.exe"));

        let layout = AppLayout::inspect(dir.path()).unwrap();
        assert_eq!(layout.platform_tag.family(), Platform::Windows);
        assert!(layout.version.is_empty());
        assert!(layout.build_id.is_empty());
    }

    #[test]
    fn empty_directory_has_no_executable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppLayout::inspect(dir.path()),
            Err(IrisError::ExecutableNotFound(_))
        ));
    }
}
