//! Default on-disk locations.
//!
//! - Install directory: `{cache}/sauce-launcher/sc/`, falling back to the
//!   OS temp folder when no cache directory is known.
//! - Readiness file: `{temp}/sc-launcher-readyfile`

use std::path::{Path, PathBuf};

/// Subdirectory name under the user cache folder.
const LAUNCHER_DIR: &str = "sauce-launcher";

/// Fixed name of the readiness file inside the temp folder.
const READYFILE_NAME: &str = "sc-launcher-readyfile";

/// Returns the default install directory.
pub fn default_install_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(LAUNCHER_DIR)
        .join("sc")
}

/// Returns the default readiness file path.
pub fn default_readyfile() -> PathBuf {
    std::env::temp_dir().join(READYFILE_NAME)
}

/// Where a downloaded archive is stored while it is being unpacked.
pub fn archive_path(install_dir: &Path, archive_name: &str) -> PathBuf {
    install_dir.join(archive_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_dir_layout() {
        let dir = default_install_dir();
        assert!(dir.ends_with("sauce-launcher/sc"));
    }

    #[test]
    fn test_readyfile_in_temp() {
        let readyfile = default_readyfile();
        assert!(readyfile.starts_with(std::env::temp_dir()));
        assert!(readyfile.ends_with(READYFILE_NAME));
    }

    #[test]
    fn test_archive_path() {
        let path = archive_path(Path::new("/opt/sc"), "sc-4.0-latest-linux.tar.gz");
        assert_eq!(path, PathBuf::from("/opt/sc/sc-4.0-latest-linux.tar.gz"));
    }
}
