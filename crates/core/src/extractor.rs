//! Unpacking Firefox packages into the work directory cache
//!
//! Zip and gzip tarballs are unpacked in-process. Formats without an
//! in-process decoder (`.tar.bz2`, `.dmg`, installer `.exe`) go through 7-Zip,
//! which the preflight checks guarantee is on `PATH`.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, UNIX_EPOCH};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::candidate::AppLayout;
use crate::error::{IrisError, IrisResult};
use crate::fetcher::is_fresh;
use crate::platform::{BuildPlatform, Platform};

/// Produces an application layout from a package file
pub trait Extractor: Send + Sync {
    fn extract(
        &self,
        archive: &Path,
        platform: Platform,
        workdir: &Path,
        cache_timeout: Duration,
    ) -> IrisResult<AppLayout>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
    TarBz2,
    DiskImage,
    Installer,
}

impl ArchiveFormat {
    fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar.bz2") {
            Some(ArchiveFormat::TarBz2)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else if name.ends_with(".dmg") {
            Some(ArchiveFormat::DiskImage)
        } else if name.ends_with(".exe") {
            Some(ArchiveFormat::Installer)
        } else {
            None
        }
    }
}

/// Extracts packages into `<workdir>/cache/extracted/<name>-<key>`
pub struct ArchiveExtractor {
    seven_zip: OsString,
}

impl ArchiveExtractor {
    pub fn new(seven_zip: impl Into<OsString>) -> Self {
        Self {
            seven_zip: seven_zip.into(),
        }
    }

    /// Directory a package is extracted to.
    ///
    /// The key covers the package's absolute path, size and modification time,
    /// so a rebuilt package at the same path gets a fresh directory.
    pub fn target_dir(&self, archive: &Path, workdir: &Path) -> IrisResult<PathBuf> {
        let archive = std::fs::canonicalize(archive)?;
        let meta = std::fs::metadata(&archive)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(archive.to_string_lossy().as_bytes());
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime.to_le_bytes());
        let key = hex::encode(hasher.finalize());

        let stem = archive
            .file_name()
            .map(|n| n.to_string_lossy().replace(' ', "_"))
            .unwrap_or_else(|| "package".to_string());
        Ok(workdir
            .join("cache")
            .join("extracted")
            .join(format!("{}-{}", stem, &key[..12])))
    }

    fn unpack(&self, archive: &Path, format: ArchiveFormat, out_dir: &Path) -> IrisResult<()> {
        match format {
            ArchiveFormat::Zip => extract_zip(archive, out_dir),
            ArchiveFormat::TarGz => {
                let file = File::open(archive)?;
                extract_tar(GzDecoder::new(file), archive, out_dir)
            }
            ArchiveFormat::Tar => extract_tar(File::open(archive)?, archive, out_dir),
            ArchiveFormat::TarBz2 => {
                // 7z strips the bzip2 layer into a staging dir; the tarball inside
                // is unpacked in-process.
                let staging = tempfile::Builder::new()
                    .prefix("iris_unpack_")
                    .tempdir_in(out_dir.parent().unwrap_or(out_dir))?;
                self.seven_zip(archive, staging.path())?;
                let tarball = std::fs::read_dir(staging.path())?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .find(|p| p.is_file())
                    .ok_or_else(|| IrisError::extraction(archive, "7z produced no tarball"))?;
                extract_tar(File::open(&tarball)?, archive, out_dir)
            }
            ArchiveFormat::DiskImage | ArchiveFormat::Installer => self.seven_zip(archive, out_dir),
        }
    }

    fn seven_zip(&self, archive: &Path, out_dir: &Path) -> IrisResult<()> {
        let mut out_arg = OsString::from("-o");
        out_arg.push(out_dir.as_os_str());

        debug!("Running {:?} x -y {:?}", self.seven_zip, archive);
        let output = Command::new(&self.seven_zip)
            .arg("x")
            .arg("-y")
            .arg(out_arg)
            .arg(archive)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| IrisError::extraction(archive, format!("failed to run 7z: {e}")))?;

        if !output.status.success() {
            return Err(IrisError::extraction(
                archive,
                format!(
                    "7z exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(())
    }
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new("7z")
    }
}

impl Extractor for ArchiveExtractor {
    fn extract(
        &self,
        archive: &Path,
        platform: Platform,
        workdir: &Path,
        cache_timeout: Duration,
    ) -> IrisResult<AppLayout> {
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = ArchiveFormat::from_name(&file_name)
            .ok_or_else(|| IrisError::extraction(archive, "unsupported package format"))?;
        let out_dir = self.target_dir(archive, workdir)?;

        let cached = if is_fresh(&out_dir, cache_timeout) {
            AppLayout::inspect(&out_dir).ok()
        } else {
            None
        };

        let mut layout = match cached {
            Some(layout) => {
                info!("Using cached extraction of {} at {}", file_name, out_dir.display());
                layout
            }
            None => {
                if out_dir.exists() {
                    debug!("Removing stale extraction {}", out_dir.display());
                    std::fs::remove_dir_all(&out_dir)?;
                }
                prune_stale_extractions(&out_dir);
                std::fs::create_dir_all(&out_dir)?;

                info!("Extracting {} on {}", file_name, platform);
                if let Err(e) = self.unpack(archive, format, &out_dir) {
                    let _ = std::fs::remove_dir_all(&out_dir);
                    return Err(e);
                }
                AppLayout::inspect(&out_dir).map_err(|e| match e {
                    IrisError::ExecutableNotFound(_) => {
                        IrisError::extraction(archive, "package contains no Firefox executable")
                    }
                    other => other,
                })?
            }
        };

        if let Some(tag) = BuildPlatform::from_archive_name(&file_name) {
            if tag.family() != layout.platform_tag.family() {
                warn!(
                    "Package name says {} but its layout looks like {}",
                    tag,
                    layout.platform_tag.family()
                );
            }
            layout.platform_tag = tag;
        }
        Ok(layout)
    }
}

fn extract_tar<R: std::io::Read>(reader: R, archive: &Path, out_dir: &Path) -> IrisResult<()> {
    let mut ar = tar::Archive::new(reader);
    ar.set_preserve_permissions(true);
    for entry in ar.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.to_path_buf();
        let rel = sanitize_rel_path(&entry_path).map_err(|reason| IrisError::extraction(archive, reason))?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let target = entry
                .link_name()?
                .map(|t| t.into_owned())
                .ok_or_else(|| IrisError::extraction(archive, format!("link without target: {}", rel.display())))?;
            // Symlink targets resolve from the link's directory, hard links from the archive root.
            let base = if kind.is_symlink() {
                rel.parent().unwrap_or(Path::new(""))
            } else {
                Path::new("")
            };
            if link_escapes(base, &target) {
                return Err(IrisError::extraction(
                    archive,
                    format!("link {} points outside the package: {}", rel.display(), target.display()),
                ));
            }
        }

        // unpack_in also refuses to write through links that leave out_dir.
        if !entry.unpack_in(out_dir)? {
            return Err(IrisError::extraction(
                archive,
                format!("refusing to unpack {}", entry_path.display()),
            ));
        }
    }
    Ok(())
}

/// True if `target`, taken relative to `base` inside the package, is absolute
/// or climbs above the package root.
fn link_escapes(base: &Path, target: &Path) -> bool {
    let mut depth = base.components().filter(|c| matches!(c, Component::Normal(_))).count();
    for c in target.components() {
        match c {
            Component::Prefix(_) | Component::RootDir => return true,
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return true,
            },
            Component::CurDir => {}
            Component::Normal(_) => depth += 1,
        }
    }
    false
}

/// Remove earlier extractions of the same package name, left behind when the
/// package was replaced and so hashed to a new key.
fn prune_stale_extractions(out_dir: &Path) {
    let (Some(parent), Some(name)) = (out_dir.parent(), out_dir.file_name().and_then(|n| n.to_str())) else {
        return;
    };
    // `<stem>-<12 hex digits>`
    let Some(stem) = name.len().checked_sub(13).and_then(|i| name.get(..i)) else {
        return;
    };
    let Ok(entries) = std::fs::read_dir(parent) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path == out_dir || !path.is_dir() {
            continue;
        }
        let sibling = entry.file_name().to_string_lossy().into_owned();
        let is_same_package = sibling
            .strip_prefix(stem)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|key| key.len() == 12 && key.bytes().all(|b| b.is_ascii_hexdigit()));
        if !is_same_package {
            continue;
        }
        debug!("Removing superseded extraction {}", path.display());
        if let Err(e) = std::fs::remove_dir_all(&path) {
            warn!("Unable to remove {}: {}", path.display(), e);
        }
    }
}

fn extract_zip(archive: &Path, out_dir: &Path) -> IrisResult<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| IrisError::extraction(archive, e))?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| IrisError::extraction(archive, e))?;
        let name = entry.name().to_string();
        let rel = sanitize_rel_path(Path::new(&name)).map_err(|reason| IrisError::extraction(archive, reason))?;
        let out_path = out_dir.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
            }
        }
    }
    Ok(())
}

fn sanitize_rel_path(path: &Path) -> Result<PathBuf, String> {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("absolute path in archive: {}", path.display()))
            }
            Component::ParentDir => return Err(format!("`..` in archive path: {}", path.display())),
            Component::CurDir => {}
            Component::Normal(p) => out.push(p),
        }
    }
    Ok(out)
}
