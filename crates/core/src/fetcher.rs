//! Release archive downloads with a time-bounded cache

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{IrisError, IrisResult};
use crate::platform::BuildPlatform;

/// Cached downloads and extractions older than this are fetched again
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://download.mozilla.org/";

/// A download that receives nothing for this long is abandoned
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Symbolic release identifiers and their download.mozilla.org products
const RELEASES: &[(&str, &str)] = &[
    ("nightly", "firefox-nightly-latest-ssl"),
    ("beta", "firefox-beta-latest-ssl"),
    ("devedition", "firefox-devedition-latest-ssl"),
    ("release", "firefox-latest-ssl"),
    ("esr", "firefox-esr-latest-ssl"),
];

/// All known release identifiers
pub fn release_ids() -> Vec<&'static str> {
    RELEASES.iter().map(|(id, _)| *id).collect()
}

pub fn is_release(reference: &str) -> bool {
    RELEASES.iter().any(|(id, _)| *id == reference)
}

/// A downloaded release package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArchive {
    pub path: PathBuf,
    /// URL the package was served from
    pub url: String,
}

/// Source of release archives
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn download(
        &self,
        release: &str,
        locale: &str,
        platform: BuildPlatform,
        cache_timeout: Duration,
    ) -> IrisResult<FetchedArchive>;
}

/// Downloads releases from download.mozilla.org into `<workdir>/cache`
pub struct HttpFetcher {
    cache_dir: PathBuf,
    base_url: String,
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> IrisResult<Self> {
        Ok(Self {
            cache_dir: cache_dir.into(),
            base_url: base_url.into(),
            client: build_client(DEFAULT_READ_TIMEOUT)?,
        })
    }

    /// Fail downloads that stall for longer than `timeout` between reads
    pub fn with_read_timeout(mut self, timeout: Duration) -> IrisResult<Self> {
        self.client = build_client(timeout)?;
        Ok(self)
    }

    /// Download URL for a release, `None` for unknown identifiers
    pub fn download_url(&self, release: &str, locale: &str, platform: BuildPlatform) -> Option<String> {
        let (_, product) = RELEASES.iter().find(|(id, _)| *id == release)?;
        Some(format!(
            "{}?product={}&os={}&lang={}",
            self.base_url,
            product,
            platform.download_os_id(),
            locale
        ))
    }

    /// Cache location of a release package
    pub fn cache_path(&self, release: &str, locale: &str, platform: BuildPlatform) -> PathBuf {
        self.cache_dir.join(format!(
            "firefox-{}-{}-{}.{}",
            release,
            locale,
            platform,
            platform.archive_extension()
        ))
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<String, String> {
        let mut resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        let served_from = resp.url().to_string();

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| e.to_string())?;
        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| format!("create {}: {}", partial.display(), e))?;

        let mut received = 0u64;
        while let Some(chunk) = resp.chunk().await.map_err(|e| e.to_string())? {
            received += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        }
        file.flush().await.map_err(|e| e.to_string())?;
        drop(file);

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| format!("rename {}: {}", partial.display(), e))?;
        debug!("Received {} bytes from {}", received, served_from);
        Ok(served_from)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn download(
        &self,
        release: &str,
        locale: &str,
        platform: BuildPlatform,
        cache_timeout: Duration,
    ) -> IrisResult<FetchedArchive> {
        let url = self
            .download_url(release, locale, platform)
            .ok_or_else(|| IrisError::UnknownRelease {
                reference: release.to_string(),
                valid: release_ids().join(", "),
            })?;
        let dest = self.cache_path(release, locale, platform);

        if is_fresh(&dest, cache_timeout) {
            info!("Using cached Firefox \"{}\" build at {}", release, dest.display());
            return Ok(FetchedArchive { path: dest, url });
        }

        info!("Downloading {}", url);
        match self.fetch(&url, &dest).await {
            Ok(served_from) => Ok(FetchedArchive {
                path: dest,
                url: served_from,
            }),
            Err(reason) => {
                let _ = tokio::fs::remove_file(partial_path(&dest)).await;
                Err(IrisError::DownloadFailed {
                    release: release.to_string(),
                    platform: platform.to_string(),
                    reason,
                })
            }
        }
    }
}

fn build_client(read_timeout: Duration) -> IrisResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .read_timeout(read_timeout)
        .build()
        .map_err(|e| IrisError::InvalidConfig(format!("HTTP client: {e}")))
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Whether a cache entry exists and was written within `timeout`
pub fn is_fresh(path: &Path, timeout: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| {
            SystemTime::now()
                .duration_since(modified)
                .map(|age| age < timeout)
                // Modified in the future: clock skew, treat as fresh.
                .unwrap_or(true)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(dir: &Path) -> HttpFetcher {
        HttpFetcher::new(dir, DEFAULT_DOWNLOAD_BASE_URL).unwrap()
    }

    #[test]
    fn builds_download_urls() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path());

        assert_eq!(
            f.download_url("nightly", "en-US", BuildPlatform::Win64).as_deref(),
            Some("https://download.mozilla.org/?product=firefox-nightly-latest-ssl&os=win64&lang=en-US")
        );
        assert_eq!(
            f.download_url("release", "de", BuildPlatform::Linux32).as_deref(),
            Some("https://download.mozilla.org/?product=firefox-latest-ssl&os=linux&lang=de")
        );
        assert_eq!(f.download_url("stable", "en-US", BuildPlatform::Osx), None);
    }

    #[test]
    fn cache_path_carries_platform_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = fetcher(dir.path()).cache_path("beta", "fr", BuildPlatform::Osx);
        assert_eq!(path, dir.path().join("firefox-beta-fr-osx.dmg"));
    }

    #[test]
    fn cache_freshness_follows_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firefox.tar.bz2");
        assert!(!is_fresh(&path, DEFAULT_CACHE_TIMEOUT));

        std::fs::write(&path, b"archive").unwrap();
        assert!(is_fresh(&path, DEFAULT_CACHE_TIMEOUT));
        assert!(!is_fresh(&path, Duration::ZERO));
    }

    #[tokio::test]
    async fn fresh_cache_entry_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        // Unroutable base URL: any network access would fail the test.
        let f = HttpFetcher::new(dir.path(), "http://127.0.0.1:9/").unwrap();
        let cached = f.cache_path("esr", "en-US", BuildPlatform::Linux64);
        std::fs::write(&cached, b"archive").unwrap();

        let archive = f
            .download("esr", "en-US", BuildPlatform::Linux64, DEFAULT_CACHE_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(archive.path, cached);
        assert!(archive.url.contains("firefox-esr-latest-ssl"));
    }

    #[tokio::test]
    async fn unreachable_server_is_download_failure() {
        let dir = tempfile::tempdir().unwrap();
        let f = HttpFetcher::new(dir.path(), "http://127.0.0.1:9/").unwrap();

        let err = f
            .download("nightly", "en-US", BuildPlatform::Linux64, DEFAULT_CACHE_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, IrisError::DownloadFailed { .. }));
        assert_eq!(err.exit_code(), crate::error::exit_code::DOWNLOAD_FAILED);
    }

    #[tokio::test]
    async fn stalled_transfer_times_out() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\npartial")
                .await
                .unwrap();
            // Hold the connection open without sending the rest.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let dir = tempfile::tempdir().unwrap();
        let f = HttpFetcher::new(dir.path(), format!("http://{addr}/"))
            .unwrap()
            .with_read_timeout(Duration::from_millis(200))
            .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            f.download("nightly", "en-US", BuildPlatform::Linux64, DEFAULT_CACHE_TIMEOUT),
        )
        .await
        .expect("download should give up on a stalled server");

        let err = result.unwrap_err();
        assert!(matches!(err, IrisError::DownloadFailed { .. }));
        let cached = f.cache_path("nightly", "en-US", BuildPlatform::Linux64);
        assert!(!cached.exists());
        assert!(!partial_path(&cached).exists());
    }
}
