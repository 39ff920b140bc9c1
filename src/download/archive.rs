//! Archive extraction and folder copying

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Copy progress: (bytes copied into the tracked folder, total bytes).
/// Errors are logged and ignored.
pub type CopyProgress<'a> = &'a (dyn Fn(u64, u64) -> Result<()> + Send + Sync);

/// Extraction failures
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("Archive {} is not a valid zip file", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("Archive {} has no entries", .0.display())]
    Empty(PathBuf),
    #[error("Failed to extract {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Extract a ZIP archive into `dest`, returning the extracted root folder.
///
/// The first entry of the archive names the root folder.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<PathBuf, ArchiveError> {
    if !archive.is_file() {
        return Err(ArchiveError::Missing(archive.to_path_buf()));
    }

    let io_err = |source| ArchiveError::Io {
        path: archive.to_path_buf(),
        source,
    };
    let corrupt = |source| ArchiveError::Corrupt {
        path: archive.to_path_buf(),
        source,
    };

    let file = fs::File::open(archive).map_err(io_err)?;
    let mut zip = zip::ZipArchive::new(file).map_err(corrupt)?;

    if zip.is_empty() {
        return Err(ArchiveError::Empty(archive.to_path_buf()));
    }

    let root_name = {
        let first = zip.by_index(0).map_err(corrupt)?;
        let sanitized = sanitize_path(first.name());
        sanitized.split('/').next().unwrap_or_default().to_string()
    };
    if root_name.is_empty() {
        return Err(ArchiveError::Empty(archive.to_path_buf()));
    }

    fs::create_dir_all(dest).map_err(io_err)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(corrupt)?;
        let relative = sanitize_path(entry.name());
        if relative.is_empty() {
            continue;
        }
        let outpath = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(io_err)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            let mut outfile = fs::File::create(&outpath).map_err(io_err)?;
            std::io::copy(&mut entry, &mut outfile).map_err(io_err)?;

            // Set permissions on Unix
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    fs::set_permissions(&outpath, fs::Permissions::from_mode(mode))
                        .map_err(io_err)?;
                }
            }
        }
    }

    Ok(dest.join(root_name))
}

/// Total size in bytes of all files below `path`
pub fn folder_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Copy the contents of `src` into `dest`, merging with existing folders.
///
/// Progress is reported after each file as the bytes copied below
/// `tracked` (relative to `src`, the whole tree when `None`), against the
/// total size of `src`. Returns the number of bytes copied.
pub fn copy_tree(
    src: &Path,
    dest: &Path,
    tracked: Option<&Path>,
    on_progress: Option<CopyProgress<'_>>,
) -> Result<u64> {
    let total = folder_size(src);

    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut copied_total = 0u64;
    let mut copied_tracked = 0u64;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.context("Failed to walk source folder")?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .context("Walked outside of source folder")?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = fs::copy(entry.path(), &target).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                entry.path().display(),
                target.display()
            )
        })?;
        copied_total += bytes;

        if tracked.map_or(true, |folder| relative.starts_with(folder)) {
            copied_tracked += bytes;
        }
        if let Some(cb) = on_progress {
            if let Err(e) = cb(copied_tracked, total) {
                tracing::debug!("Copy progress callback failed: {}", e);
            }
        }
    }

    Ok(copied_total)
}

/// Delete a folder tree, skipping entries that cannot be removed.
/// Returns the number of entries left behind.
pub fn remove_tree(path: &Path) -> usize {
    if !path.exists() {
        return 0;
    }

    let mut failures = 0;
    for entry in WalkDir::new(path).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Cannot walk {}: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };
        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())
        } else {
            fs::remove_file(entry.path())
        };
        if let Err(e) = removed {
            tracing::debug!("Failed to remove {}: {}", entry.path().display(), e);
            failures += 1;
        }
    }
    failures
}

/// Sanitize path to prevent directory traversal
fn sanitize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect::<Vec<_>>()
        .join("/")
}
