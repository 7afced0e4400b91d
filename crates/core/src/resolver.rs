//! Build candidate resolution
//!
//! A build reference is one of:
//! - an installed Firefox directory
//! - a release identifier (`nightly`, `beta`, ...)
//! - a package file (`.tar.bz2`, `.zip`, `.dmg`, ...)
//! - a mozilla-central checkout that has been built with `mach`

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::candidate::{AppLayout, Candidate, Provenance};
use crate::error::{IrisError, IrisResult};
use crate::extractor::Extractor;
use crate::fetcher::{is_release, release_ids, Fetcher, DEFAULT_CACHE_TIMEOUT};
use crate::platform::{BuildPlatform, Platform};

/// Marker file identifying a Firefox source tree
pub const BUILD_TREE_MARKER: &str = "mach";

/// `--firefox` value selecting the platform's default installation
pub const LOCAL_SENTINEL: &str = "local";

pub struct Resolver {
    fetcher: Box<dyn Fetcher>,
    extractor: Box<dyn Extractor>,
    host: Option<BuildPlatform>,
    cache_timeout: Duration,
}

impl Resolver {
    pub fn new(fetcher: Box<dyn Fetcher>, extractor: Box<dyn Extractor>) -> Self {
        Self {
            fetcher,
            extractor,
            host: BuildPlatform::detect(),
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
        }
    }

    /// Override host detection
    pub fn with_host(mut self, host: Option<BuildPlatform>) -> Self {
        self.host = host;
        self
    }

    pub fn with_cache_timeout(mut self, cache_timeout: Duration) -> Self {
        self.cache_timeout = cache_timeout;
        self
    }

    pub fn host(&self) -> Option<BuildPlatform> {
        self.host
    }

    /// Turn a build reference into a runnable candidate
    pub async fn resolve(&self, reference: &str, workdir: &Path, locale: &str) -> IrisResult<Candidate> {
        let path = Path::new(reference);

        if path.is_dir() && !is_build_tree(path) {
            info!("Using Firefox installation at {}", path.display());
            let candidate = Candidate::new(
                AppLayout::inspect(path)?,
                Provenance::LocalInstallation,
                reference,
            );
            if let Some(host) = self.host {
                self.check_platform(&candidate, host);
            }
            return Ok(candidate);
        }

        let host = self.host.ok_or_else(|| {
            error!("Unsupported platform: \"{}\"", std::env::consts::OS);
            IrisError::UnsupportedPlatform {
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            }
        })?;

        let candidate = if is_release(reference) {
            self.resolve_release(reference, workdir, locale, host).await?
        } else if path.is_file() {
            info!("Using file \"{}\" as Firefox package", reference);
            let layout = self
                .extractor
                .extract(path, host.family(), workdir, self.cache_timeout)?;
            Candidate::new(layout, Provenance::LocalArchive, reference)
        } else if is_build_tree(path) {
            self.resolve_build_tree(path)?
        } else {
            let err = IrisError::UnknownRelease {
                reference: reference.to_string(),
                valid: release_ids().join(", "),
            };
            error!("{}", err);
            return Err(err);
        };

        debug!("Build candidate executable is {}", candidate.executable_path.display());
        self.check_platform(&candidate, host);
        Ok(candidate)
    }

    async fn resolve_release(
        &self,
        release: &str,
        workdir: &Path,
        locale: &str,
        host: BuildPlatform,
    ) -> IrisResult<Candidate> {
        info!("Downloading Firefox \"{}\" build for platform \"{}\"", release, host);
        let archive = self
            .fetcher
            .download(release, locale, host, self.cache_timeout)
            .await
            .map_err(|e| {
                error!("{}", e);
                e
            })?;
        let layout = self
            .extractor
            .extract(&archive.path, host.family(), workdir, self.cache_timeout)?;
        Ok(Candidate::new(layout, Provenance::ReleaseDownload, archive.url))
    }

    fn resolve_build_tree(&self, tree: &Path) -> IrisResult<Candidate> {
        let tree = std::fs::canonicalize(tree)?;
        info!("Using Firefox build tree at {}", tree.display());

        let dist_dirs = find_dist_dirs(&tree)?;
        debug!("Potential dist directories: {:?}", dist_dirs);
        // Several object directories: the lexicographically last one wins.
        let dist = dist_dirs.last().ok_or_else(|| {
            let err = IrisError::InvalidBuildTree(tree.clone());
            error!("{}", err);
            err
        })?;
        info!("Using {} as build distribution directory", dist.display());

        let obj_dir = dist.parent().unwrap_or(&tree);
        let obj_name = obj_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Mac dist directories hold the .app bundle directly, but the layout
        // locator expects it one level below its base, so start from obj-*.
        let base = if obj_name.contains("apple-darwin") {
            info!("Looks like this is an OS X build tree");
            obj_dir
        } else {
            dist.as_path()
        };

        let mut layout = AppLayout::inspect(base).map_err(|e| match e {
            IrisError::ExecutableNotFound(_) => IrisError::InvalidBuildTree(tree.clone()),
            other => other,
        })?;
        if let Some(tag) = BuildPlatform::from_target_triple(&obj_name) {
            layout.platform_tag = tag;
        }
        Ok(Candidate::new(
            layout,
            Provenance::LocalBuildTree,
            tree.to_string_lossy(),
        ))
    }

    /// Warn when a candidate was built for another platform than the host.
    /// Returns whether the platforms differ.
    pub fn check_platform(&self, candidate: &Candidate, host: BuildPlatform) -> bool {
        if candidate.platform_tag == host {
            return false;
        }
        warn!("Platform mismatch detected");
        warn!(
            "Running a Firefox binary for \"{}\" on a \"{}\" platform will probably fail",
            candidate.platform_tag, host
        );
        true
    }
}

/// Expand the `local` sentinel to the platform's default installation
pub fn expand_reference(reference: &str, platform: Option<Platform>) -> String {
    match (reference, platform) {
        (LOCAL_SENTINEL, Some(platform)) => {
            info!("Running with default installed Firefox build");
            platform.default_install_dir().to_string_lossy().into_owned()
        }
        _ => reference.to_string(),
    }
}

pub fn is_build_tree(path: &Path) -> bool {
    path.join(BUILD_TREE_MARKER).is_file()
}

/// `obj-*/dist` directories of a build tree, sorted
fn find_dist_dirs(tree: &Path) -> IrisResult<Vec<PathBuf>> {
    let mut dists: Vec<PathBuf> = std::fs::read_dir(tree)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("obj-"))
        .map(|e| e.path().join("dist"))
        .filter(|p| p.is_dir())
        .collect();
    dists.sort();
    Ok(dists)
}
