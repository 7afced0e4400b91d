//! Error types for Iris runs

use std::path::PathBuf;

use thiserror::Error;

use crate::preflight::LockKey;

/// Process exit codes. Automation wrapping Iris relies on these staying stable.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    /// A lock key is on or Tesseract could not be found.
    pub const BLOCKED_ENVIRONMENT: i32 = 1;
    /// Configuration or unexpected I/O failure.
    pub const INTERNAL: i32 = 2;
    /// The run completed but at least one test failed.
    pub const TEST_FAILURES: i32 = 3;
    /// Unsupported platform, unusable build reference or missing 7-Zip.
    pub const UNRESOLVED_BUILD: i32 = 5;
    /// The local web server could not be started.
    pub const SPAWN_FAILED: i32 = 13;
    pub const DOWNLOAD_FAILED: i32 = -1;
}

/// An unmet precondition found by the preflight checks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("Cannot run Iris because {0} is on. Please turn it off to continue.")]
    LockKeyActive(LockKey),

    #[error("Unable to find Tesseract (searched: {searched})")]
    OcrNotFound { searched: String },

    #[error("Cannot find required archive tool `{0}` on PATH")]
    ArchiveToolMissing(String),
}

impl EnvironmentError {
    pub fn exit_code(&self) -> i32 {
        match self {
            EnvironmentError::LockKeyActive(_) | EnvironmentError::OcrNotFound { .. } => {
                exit_code::BLOCKED_ENVIRONMENT
            }
            EnvironmentError::ArchiveToolMissing(_) => exit_code::UNRESOLVED_BUILD,
        }
    }
}

#[derive(Error, Debug)]
pub enum IrisError {
    #[error("{} preflight check(s) failed", .0.len())]
    Environment(Vec<EnvironmentError>),

    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error(
        "\"{reference}\" specifies neither a Firefox release, package file, or build directory. \
         Valid Firefox release identifiers are: {valid}"
    )]
    UnknownRelease { reference: String, valid: String },

    #[error("\"{0}\" looks like a Firefox build directory, but can't find a build in it")]
    InvalidBuildTree(PathBuf),

    #[error("No Firefox executable found under {0}")]
    ExecutableNotFound(PathBuf),

    #[error("Download of Firefox \"{release}\" for {platform} failed: {reason}")]
    DownloadFailed {
        release: String,
        platform: String,
        reason: String,
    },

    #[error("Extraction of {path} failed: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("Unable to launch {name}: {reason}")]
    Spawn { name: String, reason: String },

    #[error("Test execution failed: {0}")]
    Execution(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl IrisError {
    /// Exit code for the failure class this error belongs to
    pub fn exit_code(&self) -> i32 {
        match self {
            IrisError::Environment(failures) => failures
                .first()
                .map(EnvironmentError::exit_code)
                .unwrap_or(exit_code::BLOCKED_ENVIRONMENT),
            IrisError::UnsupportedPlatform { .. }
            | IrisError::UnknownRelease { .. }
            | IrisError::InvalidBuildTree(_)
            | IrisError::ExecutableNotFound(_)
            | IrisError::Extraction { .. } => exit_code::UNRESOLVED_BUILD,
            IrisError::DownloadFailed { .. } => exit_code::DOWNLOAD_FAILED,
            IrisError::Spawn { .. } => exit_code::SPAWN_FAILED,
            IrisError::Execution(_)
            | IrisError::InvalidConfig(_)
            | IrisError::Io(_)
            | IrisError::Json(_)
            | IrisError::Toml(_) => exit_code::INTERNAL,
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        IrisError::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type IrisResult<T> = Result<T, IrisError>;
