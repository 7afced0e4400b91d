//! Orchestrator configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IrisError, IrisResult};
use crate::fetcher::{DEFAULT_CACHE_TIMEOUT, DEFAULT_DOWNLOAD_BASE_URL, DEFAULT_READ_TIMEOUT};
use crate::server::DEFAULT_SETTLE;

/// Looked up in the work directory when no `--config` is given
pub const CONFIG_FILE: &str = "config.toml";

/// Settings read from `config.toml`. Command-line flags take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrisConfig {
    /// Age after which cached downloads and extractions are refreshed
    pub cache_timeout_secs: u64,

    pub download_base_url: String,

    /// Seconds a download may go without receiving data
    pub download_read_timeout_secs: u64,

    /// Tesseract binary tried before the platform defaults
    pub tesseract_path: Option<PathBuf>,

    pub tests_dir: Option<PathBuf>,

    /// Command run once per test, e.g. `python3 -m iris_harness`
    pub harness: Option<String>,

    /// Directory served by the local web server, defaults to `<workdir>/local_web`
    pub local_web_root: Option<PathBuf>,

    pub server_settle_ms: u64,

    /// Name of the 7-Zip executable
    pub archive_tool: String,
}

impl Default for IrisConfig {
    fn default() -> Self {
        Self {
            cache_timeout_secs: DEFAULT_CACHE_TIMEOUT.as_secs(),
            download_base_url: DEFAULT_DOWNLOAD_BASE_URL.to_string(),
            download_read_timeout_secs: DEFAULT_READ_TIMEOUT.as_secs(),
            tesseract_path: None,
            tests_dir: None,
            harness: None,
            local_web_root: None,
            server_settle_ms: DEFAULT_SETTLE.as_millis() as u64,
            archive_tool: "7z".to_string(),
        }
    }
}

impl IrisConfig {
    /// Load configuration from file, defaults if it doesn't exist
    pub fn load(path: &Path) -> IrisResult<Self> {
        if path.exists() {
            debug!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Load an explicitly requested file, or `<workdir>/config.toml`
    pub fn resolve(explicit: Option<&Path>, workdir: &Path) -> IrisResult<Self> {
        match explicit {
            Some(path) if !path.exists() => Err(IrisError::InvalidConfig(format!(
                "config file {} not found",
                path.display()
            ))),
            Some(path) => Self::load(path),
            None => Self::load(&workdir.join(CONFIG_FILE)),
        }
    }

    fn validate(&self) -> IrisResult<()> {
        if !self.download_base_url.starts_with("http://") && !self.download_base_url.starts_with("https://") {
            return Err(IrisError::InvalidConfig(format!(
                "download_base_url must be an http(s) URL, got \"{}\"",
                self.download_base_url
            )));
        }
        if self.download_read_timeout_secs == 0 {
            return Err(IrisError::InvalidConfig("download_read_timeout_secs must be positive".into()));
        }
        if self.archive_tool.trim().is_empty() {
            return Err(IrisError::InvalidConfig("archive_tool is empty".into()));
        }
        Ok(())
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }

    pub fn download_read_timeout(&self) -> Duration {
        Duration::from_secs(self.download_read_timeout_secs)
    }

    pub fn server_settle(&self) -> Duration {
        Duration::from_millis(self.server_settle_ms)
    }
}

/// `~/.iris`, or `.iris` in the current directory when there is no home
pub fn default_workdir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".iris"))
        .unwrap_or_else(|| PathBuf::from(".iris"))
}
