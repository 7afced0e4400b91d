//! Host platform detection and per-platform lookup tables
//!
//! [`Platform`] is the operating system family Iris runs on; every
//! platform-dependent default (install location, Tesseract location, console
//! code page) is a table lookup on it. [`BuildPlatform`] identifies what a
//! Firefox build was compiled for, using the identifiers of the Mozilla
//! download service.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Mac,
    Linux,
}

impl Platform {
    /// Detect the host platform family
    pub fn detect() -> Option<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Map a `std::env::consts::OS` value to a platform family
    pub fn from_os(os: &str) -> Option<Self> {
        match os {
            "windows" => Some(Platform::Windows),
            "macos" => Some(Platform::Mac),
            "linux" => Some(Platform::Linux),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Mac => "mac",
            Platform::Linux => "linux",
        }
    }

    /// Default Firefox install locations, in order of preference
    pub fn default_install_dirs(&self) -> &'static [&'static str] {
        match self {
            Platform::Windows => &[
                r"C:\Program Files (x86)\Mozilla Firefox",
                r"C:\Program Files\Mozilla Firefox",
            ],
            Platform::Mac => &["/Applications/Firefox.app/Contents"],
            Platform::Linux => &["/usr/lib/firefox"],
        }
    }

    /// The installed Firefox to use for `--firefox local`.
    ///
    /// The first existing default location wins; if none exists the last one is
    /// returned so the resolver reports a meaningful path.
    pub fn default_install_dir(&self) -> PathBuf {
        let dirs = self.default_install_dirs();
        dirs.iter()
            .map(Path::new)
            .find(|p| p.exists())
            .or_else(|| dirs.last().map(Path::new))
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Where Tesseract is expected, in search order
    pub fn tesseract_candidates(&self) -> &'static [&'static str] {
        match self {
            Platform::Windows => &[r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe"],
            Platform::Mac | Platform::Linux => &["/usr/local/bin/tesseract", "/usr/bin/tesseract"],
        }
    }

    /// UTF-8 console code page, for platforms with a switchable one
    pub fn utf8_code_page(&self) -> Option<&'static str> {
        match self {
            Platform::Windows => Some("65001"),
            Platform::Mac | Platform::Linux => None,
        }
    }

    /// Suffix appended to executable names when searching `PATH`
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            Platform::Windows => ".exe",
            Platform::Mac | Platform::Linux => "",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target platform of a Firefox build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildPlatform {
    #[serde(rename = "linux")]
    Linux32,
    #[serde(rename = "linux64")]
    Linux64,
    #[serde(rename = "osx")]
    Osx,
    #[serde(rename = "win32")]
    Win32,
    #[serde(rename = "win64")]
    Win64,
}

impl BuildPlatform {
    pub const ALL: [BuildPlatform; 5] = [
        BuildPlatform::Linux32,
        BuildPlatform::Linux64,
        BuildPlatform::Osx,
        BuildPlatform::Win32,
        BuildPlatform::Win64,
    ];

    /// Detect the build platform matching the host
    pub fn detect() -> Option<Self> {
        Self::for_host(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn for_host(os: &str, arch: &str) -> Option<Self> {
        match (os, arch) {
            ("linux", "x86_64") | ("linux", "aarch64") => Some(BuildPlatform::Linux64),
            ("linux", "x86") => Some(BuildPlatform::Linux32),
            ("macos", _) => Some(BuildPlatform::Osx),
            ("windows", "x86_64") | ("windows", "aarch64") => Some(BuildPlatform::Win64),
            ("windows", "x86") => Some(BuildPlatform::Win32),
            _ => None,
        }
    }

    /// Best guess for a build of the given family, using the host architecture
    pub fn for_family(family: Platform) -> Self {
        let os = match family {
            Platform::Windows => "windows",
            Platform::Mac => "macos",
            Platform::Linux => "linux",
        };
        Self::for_host(os, std::env::consts::ARCH).unwrap_or(match family {
            Platform::Windows => BuildPlatform::Win64,
            Platform::Mac => BuildPlatform::Osx,
            Platform::Linux => BuildPlatform::Linux64,
        })
    }

    pub fn family(&self) -> Platform {
        match self {
            BuildPlatform::Linux32 | BuildPlatform::Linux64 => Platform::Linux,
            BuildPlatform::Osx => Platform::Mac,
            BuildPlatform::Win32 | BuildPlatform::Win64 => Platform::Windows,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPlatform::Linux32 => "linux",
            BuildPlatform::Linux64 => "linux64",
            BuildPlatform::Osx => "osx",
            BuildPlatform::Win32 => "win32",
            BuildPlatform::Win64 => "win64",
        }
    }

    /// `os` parameter understood by download.mozilla.org
    pub fn download_os_id(&self) -> &'static str {
        match self {
            BuildPlatform::Linux32 => "linux",
            BuildPlatform::Linux64 => "linux64",
            BuildPlatform::Osx => "osx",
            BuildPlatform::Win32 => "win",
            BuildPlatform::Win64 => "win64",
        }
    }

    /// Extension of release packages published for this platform
    pub fn archive_extension(&self) -> &'static str {
        match self {
            BuildPlatform::Linux32 | BuildPlatform::Linux64 => "tar.bz2",
            BuildPlatform::Osx => "dmg",
            BuildPlatform::Win32 | BuildPlatform::Win64 => "exe",
        }
    }

    /// Infer the platform from a package file name such as
    /// `firefox-62.0.en-US.linux-x86_64.tar.bz2` or `firefox-62.0.en-US.win64.zip`.
    pub fn from_archive_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.contains("linux-x86_64") || name.contains("linux64") {
            Some(BuildPlatform::Linux64)
        } else if name.contains("linux-i686") || name.contains(".linux.") {
            Some(BuildPlatform::Linux32)
        } else if name.contains("win64") {
            Some(BuildPlatform::Win64)
        } else if name.contains("win32") {
            Some(BuildPlatform::Win32)
        } else if name.contains(".mac.") || name.ends_with(".dmg") {
            Some(BuildPlatform::Osx)
        } else {
            None
        }
    }

    /// Infer the platform from a build target triple, as found in object
    /// directory names like `obj-x86_64-pc-linux-gnu`.
    pub fn from_target_triple(triple: &str) -> Option<Self> {
        let triple = triple.trim_start_matches("obj-");
        let arch = triple.split('-').next().unwrap_or_default();
        let is_64 = matches!(arch, "x86_64" | "aarch64");
        if triple.contains("apple-darwin") {
            Some(BuildPlatform::Osx)
        } else if triple.contains("linux") {
            Some(if is_64 { BuildPlatform::Linux64 } else { BuildPlatform::Linux32 })
        } else if triple.contains("mingw") || triple.contains("windows") {
            Some(if is_64 { BuildPlatform::Win64 } else { BuildPlatform::Win32 })
        } else {
            None
        }
    }
}

impl fmt::Display for BuildPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown build platform: {s}"))
    }
}
