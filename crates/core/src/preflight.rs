//! Environment checks performed before a run allocates anything

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, error, info};

use crate::error::{EnvironmentError, IrisError, IrisResult};
use crate::platform::Platform;

/// Keyboard toggles that change what simulated key presses produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    CapsLock,
    NumLock,
    ScrollLock,
}

impl LockKey {
    pub const ALL: [LockKey; 3] = [LockKey::CapsLock, LockKey::NumLock, LockKey::ScrollLock];

    pub fn label(&self) -> &'static str {
        match self {
            LockKey::CapsLock => "Caps Lock",
            LockKey::NumLock => "Num Lock",
            LockKey::ScrollLock => "Scroll Lock",
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reads lock key state. `None` means the state cannot be determined.
pub trait LockKeyProbe: Send + Sync {
    fn is_on(&self, key: LockKey) -> Option<bool>;
}

/// Queries the X server with `xset q`
pub struct XsetProbe;

impl LockKeyProbe for XsetProbe {
    fn is_on(&self, key: LockKey) -> Option<bool> {
        let output = Command::new("xset")
            .arg("q")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()
            .filter(|o| o.status.success())?;
        parse_xset_led(&String::from_utf8_lossy(&output.stdout), key)
    }
}

/// Probe for platforms without a command-line way to read lock keys
pub struct UnavailableProbe;

impl LockKeyProbe for UnavailableProbe {
    fn is_on(&self, _key: LockKey) -> Option<bool> {
        None
    }
}

/// Lock key probe suited to the host
pub fn system_probe(platform: Option<Platform>) -> Box<dyn LockKeyProbe> {
    match platform {
        Some(Platform::Linux) => Box::new(XsetProbe),
        _ => Box::new(UnavailableProbe),
    }
}

/// Extract one LED state from `xset q` output, e.g.
/// `00: Caps Lock:   off    01: Num Lock:    on     02: Scroll Lock: off`
pub fn parse_xset_led(output: &str, key: LockKey) -> Option<bool> {
    let needle = format!("{}:", key.label());
    let start = output.find(&needle)? + needle.len();
    match output[start..].split_whitespace().next()? {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

/// Tools located by a successful preflight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub tesseract: PathBuf,
    pub archive_tool: PathBuf,
}

pub struct Preflight {
    platform: Option<Platform>,
    probe: Box<dyn LockKeyProbe>,
    tesseract_candidates: Vec<PathBuf>,
    archive_tool: String,
    search_path: Option<OsString>,
}

impl Preflight {
    pub fn new(platform: Option<Platform>) -> Self {
        let tesseract_candidates = platform
            .map(|p| p.tesseract_candidates().iter().map(PathBuf::from).collect())
            .unwrap_or_default();

        Self {
            platform,
            probe: system_probe(platform),
            tesseract_candidates,
            archive_tool: "7z".to_string(),
            search_path: std::env::var_os("PATH"),
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn LockKeyProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Try `path` before the platform's default Tesseract locations
    pub fn with_tesseract_override(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.tesseract_candidates.insert(0, path);
        }
        self
    }

    pub fn with_tesseract_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.tesseract_candidates = candidates;
        self
    }

    pub fn with_archive_tool(mut self, name: impl Into<String>) -> Self {
        self.archive_tool = name.into();
        self
    }

    /// Use `path` instead of the process `PATH` when looking up tools
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Run every check, logging each failure, and fail if any check failed
    pub fn validate(&self) -> IrisResult<PreflightReport> {
        let mut failures = self.check_lock_keys();
        let tesseract = self.find_tesseract().map_err(|e| failures.push(e)).ok();
        let archive_tool = self.find_archive_tool().map_err(|e| failures.push(e)).ok();

        for failure in &failures {
            error!("{}", failure);
        }
        if failures.iter().any(|f| !matches!(f, EnvironmentError::LockKeyActive(_))) {
            error!("Please consult the wiki for complete setup instructions.");
        }

        match (tesseract, archive_tool) {
            (Some(tesseract), Some(archive_tool)) if failures.is_empty() => {
                info!("Tesseract: {}", tesseract.display());
                debug!("Archive tool: {}", archive_tool.display());
                Ok(PreflightReport {
                    tesseract,
                    archive_tool,
                })
            }
            _ => Err(IrisError::Environment(failures)),
        }
    }

    /// One failure per active lock key
    pub fn check_lock_keys(&self) -> Vec<EnvironmentError> {
        LockKey::ALL
            .into_iter()
            .filter(|key| match self.probe.is_on(*key) {
                Some(on) => on,
                None => {
                    debug!("Cannot determine {} state, assuming off", key);
                    false
                }
            })
            .map(EnvironmentError::LockKeyActive)
            .collect()
    }

    pub fn find_tesseract(&self) -> Result<PathBuf, EnvironmentError> {
        self.tesseract_candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
            .ok_or_else(|| EnvironmentError::OcrNotFound {
                searched: self
                    .tesseract_candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn find_archive_tool(&self) -> Result<PathBuf, EnvironmentError> {
        let suffix = self.platform.map(|p| p.exe_suffix()).unwrap_or_default();
        self.search_path
            .as_deref()
            .and_then(|path| find_executable(&self.archive_tool, suffix, path))
            .ok_or_else(|| EnvironmentError::ArchiveToolMissing(self.archive_tool.clone()))
    }
}

/// Look `name` up on a `PATH`-style search list
pub fn find_executable(name: &str, suffix: &str, search_path: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .flat_map(|dir| [dir.join(name), dir.join(format!("{name}{suffix}"))])
        .find(|candidate| is_file(candidate))
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
