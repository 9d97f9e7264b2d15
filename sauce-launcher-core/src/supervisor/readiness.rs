//! Readiness file polling.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::LaunchError;

/// The file the binary creates once the tunnel accepts connections.
#[derive(Debug, Clone)]
pub struct ReadyFile {
    path: PathBuf,
}

impl ReadyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes a file left by an earlier run so it cannot signal readiness
    /// for this one. Returns whether a file was removed.
    pub async fn clear_stale(&self) -> Result<bool, LaunchError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.watch_error(source)),
        }
    }

    pub async fn exists(&self) -> Result<bool, LaunchError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.watch_error(source)),
        }
    }

    fn watch_error(&self, source: io::Error) -> LaunchError {
        LaunchError::Watch {
            path: self.path.clone(),
            source,
        }
    }
}

/// Fires at most once, on the first check that finds the file.
#[derive(Debug)]
pub struct ReadinessWatch {
    file: ReadyFile,
    fired: bool,
}

impl ReadinessWatch {
    pub fn new(file: ReadyFile) -> Self {
        Self { file, fired: false }
    }

    /// `Ok(true)` exactly once.
    pub async fn check(&mut self) -> Result<bool, LaunchError> {
        if self.fired || !self.file.exists().await? {
            return Ok(false);
        }
        self.fired = true;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_clear_stale() {
        let temp_dir = TempDir::new().unwrap();
        let ready = ReadyFile::new(temp_dir.path().join("sc-launcher-readyfile"));

        assert!(!ready.clear_stale().await.unwrap());

        std::fs::write(ready.path(), b"").unwrap();
        assert!(ready.clear_stale().await.unwrap());
        assert!(!ready.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_watch_fires_once() {
        let temp_dir = TempDir::new().unwrap();
        let ready = ReadyFile::new(temp_dir.path().join("ready"));
        let mut watch = ReadinessWatch::new(ready.clone());

        assert!(!watch.check().await.unwrap());

        std::fs::write(ready.path(), b"").unwrap();
        assert!(watch.check().await.unwrap());
        assert!(!watch.check().await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_parent_is_watch_error() {
        let temp_dir = TempDir::new().unwrap();
        // A path below a regular file fails with ENOTDIR, not NotFound.
        let file = temp_dir.path().join("plain");
        std::fs::write(&file, b"").unwrap();

        let ready = ReadyFile::new(file.join("ready"));
        assert!(matches!(
            ready.exists().await,
            Err(LaunchError::Watch { .. })
        ));
    }
}
