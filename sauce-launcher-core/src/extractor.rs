//! Archive unpacking for downloaded Sauce Connect distributions.
//!
//! Tarballs are unpacked with the system `tar` so file modes and ownership
//! come out exactly as published; when no `tar` is on the PATH the archive
//! is unpacked in-process. Zip archives are always unpacked in-process and
//! overwrite existing files.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::platform::ArchiveFormat;

// ============================================================================
// Archive Extraction
// ============================================================================

/// Unpacks `archive_path` into `dest_dir`, choosing the method by file name.
pub async fn unpack_archive(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let format = ArchiveFormat::from_file_name(&file_name);

    info!(
        "Extracting {:?} archive {} to {}",
        format,
        archive_path.display(),
        dest_dir.display()
    );

    tokio::fs::create_dir_all(dest_dir)
        .await
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    // `tar` runs with `dest_dir` as its working directory.
    let archive_path = archive_path
        .canonicalize()
        .with_context(|| format!("Archive not found: {}", archive_path.display()))?;

    match format {
        ArchiveFormat::TarGz => match run_tar(&archive_path, dest_dir).await? {
            true => Ok(()),
            false => {
                debug!("No tar executable on PATH, unpacking in-process");
                blocking(archive_path, dest_dir, extract_tar_gz).await
            }
        },
        ArchiveFormat::Zip => blocking(archive_path, dest_dir, extract_zip).await,
    }
}

async fn blocking(
    archive_path: PathBuf,
    dest_dir: &Path,
    extract: fn(&Path, &Path) -> Result<()>,
) -> Result<()> {
    let dest_dir = dest_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract(&archive_path, &dest_dir))
        .await
        .context("Extraction task failed")?
}

/// Runs `tar -xf`. Returns `false` when no `tar` executable exists.
async fn run_tar(archive_path: &Path, dest_dir: &Path) -> Result<bool> {
    let output = match tokio::process::Command::new("tar")
        .arg("-xf")
        .arg(archive_path)
        .current_dir(dest_dir)
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).context("Failed to run tar"),
    };

    if !output.status.success() {
        anyhow::bail!(
            "tar exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    debug!("tar extraction complete");
    Ok(true)
}

// ============================================================================
// ZIP Extraction
// ============================================================================

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open zip: {}", archive_path.display()))?;

    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip: {}", archive_path.display()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => {
                debug!("Skipping unsafe path in zip");
                continue;
            }
        };

        let dest_path = dest_dir.join(&entry_path);

        if entry.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut outfile = File::create(&dest_path)
                .with_context(|| format!("Failed to create: {}", dest_path.display()))?;

            io::copy(&mut entry, &mut outfile)?;

            #[cfg(unix)]
            set_unix_permissions(&dest_path, entry.unix_mode())?;
        }
    }

    debug!("ZIP extraction complete");
    Ok(())
}

// ============================================================================
// TAR.GZ Extraction
// ============================================================================

fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open tar.gz: {}", archive_path.display()))?;

    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    extract_tar(decoder, dest_dir)
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    let dest_dir_canonical = dest_dir
        .canonicalize()
        .unwrap_or_else(|_| dest_dir.to_path_buf());

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping link entry in tar archive");
            continue;
        }

        let path = entry.path()?.into_owned();

        if path.is_absolute()
            || path
                .components()
                .any(|c| c == std::path::Component::ParentDir)
        {
            warn!("Skipping unsafe path in tar: {:?}", path);
            continue;
        }

        let dest_path = dest_dir.join(&path);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
            if !parent.canonicalize()?.starts_with(&dest_dir_canonical) {
                warn!("Skipping path that escapes {}: {:?}", dest_dir.display(), path);
                continue;
            }
        }

        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_file() {
            let mut outfile = File::create(&dest_path)
                .with_context(|| format!("Failed to create: {}", dest_path.display()))?;
            io::copy(&mut entry, &mut outfile)?;
            outfile.flush()?;

            #[cfg(unix)]
            set_unix_permissions(&dest_path, entry.header().mode().ok())?;
        }
    }

    debug!("TAR extraction complete");
    Ok(())
}

// ============================================================================
// Unix Permissions
// ============================================================================

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        if mode & 0o111 != 0 {
            let permissions = fs::Permissions::from_mode(mode | 0o755);
            fs::set_permissions(path, permissions)
                .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
        }
    }

    Ok(())
}

/// Sets executable permission on a file (Unix only).
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for {}", path.display()))?
            .permissions();
        permissions.set_mode(permissions.mode() | 0o755);

        fs::set_permissions(path, permissions).with_context(|| {
            format!("Failed to set executable permission on {}", path.display())
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8], u32)]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (name, data, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
    }

    #[tokio::test]
    async fn test_unpack_zip_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("sc-4.0-latest-osx.zip");
        let extract_dir = temp_dir.path().join("extracted");

        {
            let file = File::create(&archive_path).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored)
                .unix_permissions(0o755);

            zip.start_file("sc-4.0-osx/bin/sc", options).unwrap();
            zip.write_all(b"new binary").unwrap();
            zip.finish().unwrap();
        }

        let existing = extract_dir.join("sc-4.0-osx/bin/sc");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"old binary that is longer").unwrap();

        unpack_archive(&archive_path, &extract_dir).await.unwrap();

        assert_eq!(fs::read(&existing).unwrap(), b"new binary");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&existing).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0);
        }
    }

    #[tokio::test]
    async fn test_unpack_tar_gz() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("sc-4.0-latest-linux.tar.gz");
        let extract_dir = temp_dir.path().join("extracted");

        write_tar_gz(
            &archive_path,
            &[
                ("sc-4.0-linux/bin/sc", &b"#!/bin/sh\n"[..], 0o755),
                ("sc-4.0-linux/README", &b"readme"[..], 0o644),
            ],
        );

        unpack_archive(&archive_path, &extract_dir).await.unwrap();

        assert!(extract_dir.join("sc-4.0-linux/bin/sc").exists());
        assert_eq!(
            fs::read_to_string(extract_dir.join("sc-4.0-linux/README")).unwrap(),
            "readme"
        );
    }

    #[test]
    fn test_in_process_tar_keeps_exec_bit() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("sc.tar.gz");
        let extract_dir = temp_dir.path().join("extracted");
        fs::create_dir_all(&extract_dir).unwrap();

        write_tar_gz(&archive_path, &[("sc-4.0-linux/bin/sc", &b"bin"[..], 0o755)]);
        extract_tar_gz(&archive_path, &extract_dir).unwrap();

        let bin = extract_dir.join("sc-4.0-linux/bin/sc");
        assert_eq!(fs::read(&bin).unwrap(), b"bin");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&bin).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0);
        }
    }

    #[tokio::test]
    async fn test_unpack_corrupt_archive_fails() {
        let temp_dir = TempDir::new().unwrap();
        let extract_dir = temp_dir.path().join("extracted");

        let zip_path = temp_dir.path().join("broken.zip");
        fs::write(&zip_path, b"not a zip").unwrap();
        assert!(unpack_archive(&zip_path, &extract_dir).await.is_err());

        let tar_path = temp_dir.path().join("broken.tar.gz");
        fs::write(&tar_path, b"not a tarball").unwrap();
        assert!(unpack_archive(&tar_path, &extract_dir).await.is_err());
    }

    #[tokio::test]
    async fn test_unpack_missing_archive_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.zip");
        assert!(unpack_archive(&missing, temp_dir.path()).await.is_err());
    }

    #[test]
    fn test_tar_symlink_escape_blocked() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("malicious.tar.gz");
        let extract_dir = temp_dir.path().join("extracted");
        let escape_target = temp_dir.path().join("escaped_file.txt");
        fs::create_dir_all(&extract_dir).unwrap();

        {
            let file = File::create(&archive_path).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, "escape_link", "../escaped_file.txt")
                .unwrap();

            let data = b"outside";
            let mut file_header = tar::Header::new_gnu();
            file_header.set_path("escape_link").unwrap();
            file_header.set_size(data.len() as u64);
            file_header.set_mode(0o644);
            file_header.set_cksum();
            builder.append(&file_header, &data[..]).unwrap();

            builder.into_inner().unwrap().finish().unwrap();
        }

        extract_tar_gz(&archive_path, &extract_dir).unwrap();

        assert!(!escape_target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_make_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("sc");
        fs::write(&file_path, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&file_path, fs::Permissions::from_mode(0o644)).unwrap();

        make_executable(&file_path).unwrap();

        let mode = fs::metadata(&file_path).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }
}
