//! Shared fixtures for iris-core integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use iris_core::extractor::Extractor;
use iris_core::fetcher::{FetchedArchive, Fetcher};
use iris_core::{AppLayout, BuildPlatform, IrisError, IrisResult, Platform};

pub const APPLICATION_INI: &str = "\
[App]
Vendor=Mozilla
Name=Firefox
Version=68.0a1
BuildID=20190415094532
";

pub fn write_exe(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"#!/bin/sh\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// A Linux-style installation: `<dir>/firefox` plus `application.ini`
pub fn linux_install(dir: &Path) -> PathBuf {
    write_exe(&dir.join("firefox"));
    std::fs::write(dir.join("application.ini"), APPLICATION_INI).unwrap();
    dir.to_path_buf()
}

/// Serves a fixed archive path and counts downloads
#[derive(Clone, Default)]
pub struct FakeFetcher {
    pub archive: PathBuf,
    pub url: String,
    pub fail: bool,
    pub calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn serving(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            url: "https://download-installer.cdn.mozilla.net/pub/firefox/nightly/firefox.tar.bz2".into(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn download(
        &self,
        release: &str,
        _locale: &str,
        platform: BuildPlatform,
        _cache_timeout: Duration,
    ) -> IrisResult<FetchedArchive> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(IrisError::DownloadFailed {
                release: release.to_string(),
                platform: platform.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(FetchedArchive {
            path: self.archive.clone(),
            url: self.url.clone(),
        })
    }
}

/// Pretends every package unpacks to `layout_root` and records what it was given
#[derive(Clone, Default)]
pub struct FakeExtractor {
    pub layout_root: PathBuf,
    pub extracted: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeExtractor {
    pub fn unpacking_to(layout_root: impl Into<PathBuf>) -> Self {
        Self {
            layout_root: layout_root.into(),
            ..Default::default()
        }
    }

    pub fn extracted(&self) -> Vec<PathBuf> {
        self.extracted.lock().unwrap().clone()
    }
}

impl Extractor for FakeExtractor {
    fn extract(
        &self,
        archive: &Path,
        _platform: Platform,
        _workdir: &Path,
        _cache_timeout: Duration,
    ) -> IrisResult<AppLayout> {
        self.extracted.lock().unwrap().push(archive.to_path_buf());
        AppLayout::inspect(&self.layout_root)
    }
}
