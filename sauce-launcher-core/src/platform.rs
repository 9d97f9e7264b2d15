//! Platform detection and archive naming.
//!
//! Sauce Connect ships one archive per operating system family. This module
//! maps a platform identifier (as reported by the host) to the archive file
//! name, the folder the archive unpacks into, and the binary inside it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Platform
// ============================================================================

/// Operating system family that selects the Sauce Connect distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Osx,
    Win32,
    Linux,
}

impl Platform {
    /// Detects the current platform at runtime.
    pub fn detect() -> Self {
        Self::from_identifier(std::env::consts::OS)
    }

    /// Maps a platform identifier to a distribution.
    ///
    /// Accepts both Rust (`macos`, `windows`) and Node-style (`darwin`,
    /// `win32`, `win64`) identifiers. Anything unrecognized gets the Linux
    /// distribution.
    pub fn from_identifier(identifier: &str) -> Self {
        match identifier.to_ascii_lowercase().as_str() {
            "darwin" | "macos" | "osx" => Self::Osx,
            "win32" | "win64" | "windows" => Self::Win32,
            _ => Self::Linux,
        }
    }

    /// File name of the archive published for this platform.
    pub fn archive_name(&self) -> &'static str {
        match self {
            Self::Osx => "sc-4.0-latest-osx.zip",
            Self::Win32 => "sc-4.0-latest-win32.zip",
            Self::Linux => "sc-4.0-latest-linux.tar.gz",
        }
    }

    /// Name of the top-level folder created when the archive is unpacked.
    pub fn folder_name(&self) -> &'static str {
        match self {
            Self::Osx => "sc-4.0-osx",
            Self::Win32 => "sc-4.0-win32",
            Self::Linux => "sc-4.0-linux",
        }
    }

    /// Executable file name inside `<folder>/bin`.
    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::Win32 => "sc.exe",
            Self::Osx | Self::Linux => "sc",
        }
    }

    /// Path of the binary once unpacked under `install_dir`.
    ///
    /// e.g. `{install_dir}/sc-4.0-linux/bin/sc`
    pub fn binary_path(&self, install_dir: &Path) -> PathBuf {
        install_dir
            .join(self.folder_name())
            .join("bin")
            .join(self.binary_name())
    }

    /// Archive format of [`Platform::archive_name`].
    pub fn archive_format(&self) -> ArchiveFormat {
        match self {
            Self::Linux => ArchiveFormat::TarGz,
            Self::Osx | Self::Win32 => ArchiveFormat::Zip,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Osx => "osx",
            Self::Win32 => "win32",
            Self::Linux => "linux",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Archive Format
// ============================================================================

/// Archive format of a downloaded distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// Gzip-compressed tar archive (.tar.gz)
    TarGz,
    /// ZIP archive, and anything else.
    Zip,
}

impl ArchiveFormat {
    /// Infers the format from a file name. Only `.tar.gz` is treated as a
    /// tarball; every other extension goes through the zip extractor.
    pub fn from_file_name(name: &str) -> Self {
        if name.to_lowercase().ends_with(".tar.gz") {
            Self::TarGz
        } else {
            Self::Zip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_identifiers() {
        assert_eq!(Platform::from_identifier("darwin"), Platform::Osx);
        assert_eq!(Platform::from_identifier("macos"), Platform::Osx);
        assert_eq!(Platform::from_identifier("win32"), Platform::Win32);
        assert_eq!(Platform::from_identifier("win64"), Platform::Win32);
        assert_eq!(Platform::from_identifier("windows"), Platform::Win32);
        assert_eq!(Platform::from_identifier("linux"), Platform::Linux);
    }

    #[test]
    fn test_unknown_identifier_falls_back_to_linux() {
        let platform = Platform::from_identifier("freebsd");
        assert_eq!(platform, Platform::Linux);
        assert_eq!(platform.archive_name(), "sc-4.0-latest-linux.tar.gz");
        assert_eq!(Platform::from_identifier(""), Platform::Linux);
    }

    #[test]
    fn test_binary_path_nested_under_folder() {
        let install_dir = Path::new("/opt/sc");
        for identifier in ["darwin", "win32", "win64", "linux", "sunos", "aix"] {
            let platform = Platform::from_identifier(identifier);
            assert!(!platform.archive_name().is_empty());

            let bin = platform.binary_path(install_dir);
            assert!(
                bin.starts_with(install_dir.join(platform.folder_name())),
                "{} not under {}",
                bin.display(),
                platform.folder_name()
            );
            assert_eq!(bin.parent().unwrap().file_name().unwrap(), "bin");
        }
    }

    #[test]
    fn test_archive_format_matches_name() {
        for platform in [Platform::Osx, Platform::Win32, Platform::Linux] {
            assert_eq!(
                ArchiveFormat::from_file_name(platform.archive_name()),
                platform.archive_format()
            );
        }
        assert_eq!(ArchiveFormat::from_file_name("a.TAR.GZ"), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::from_file_name("a.tgz"), ArchiveFormat::Zip);
    }
}
