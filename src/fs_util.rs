use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::TransferError;

const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

fn fs_err(context: &str, path: &Path, err: impl std::fmt::Display) -> TransferError {
    TransferError::Filesystem(format!("{context} {}: {err}", path.display()))
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), TransferError> {
    let file = fs::File::open(zip_path).map_err(|err| fs_err("open zip", zip_path, err))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| TransferError::Archive(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| TransferError::Archive(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(TransferError::Archive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(|err| fs_err("create", &entry_path, err))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| fs_err("create", parent, err))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| fs_err("create", &entry_path, err))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| fs_err("write", &entry_path, err))?;
        restore_mode(&entry_path, entry.unix_mode())?;
    }
    Ok(())
}

#[cfg(unix)]
fn restore_mode(path: &Path, mode: Option<u32>) -> Result<(), TransferError> {
    use std::os::unix::fs::PermissionsExt;
    let Some(mode) = mode else {
        return Ok(());
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|err| fs_err("chmod", path, err))
}

#[cfg(not(unix))]
fn restore_mode(_path: &Path, _mode: Option<u32>) -> Result<(), TransferError> {
    Ok(())
}

/// Extracts into `target_dir`, removing whatever was there before.
pub fn extract_zip_replacing(zip_path: &Path, target_dir: &Path) -> Result<(), TransferError> {
    if target_dir.exists() {
        fs::remove_dir_all(target_dir).map_err(|err| fs_err("remove", target_dir, err))?;
    }
    fs::create_dir_all(target_dir).map_err(|err| fs_err("create", target_dir, err))?;
    extract_zip(zip_path, target_dir)
}

pub fn validate_zip(zip_path: &Path) -> Result<(), TransferError> {
    let file = fs::File::open(zip_path).map_err(|err| fs_err("open zip", zip_path, err))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| TransferError::Archive(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| TransferError::Archive(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| TransferError::Archive(err.to_string()))?;
    }
    Ok(())
}

/// Packs the contents of `source_dir` into `output_zip`. The archive root is
/// the directory itself, there is no wrapping folder. An existing archive at
/// `output_zip` is replaced only once the new one is fully written.
pub fn zip_dir(source_dir: &Path, output_zip: &Path) -> Result<(), TransferError> {
    let parent = match output_zip.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|err| fs_err("create", &parent, err))?;
    let temp = tempfile::Builder::new()
        .prefix(".outx-zip")
        .tempfile_in(&parent)
        .map_err(|err| fs_err("create temp in", &parent, err))?;

    let handle = temp.reopen().map_err(|err| fs_err("reopen", temp.path(), err))?;
    let mut writer = ZipWriter::new(handle);
    let base = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in walk_entries(source_dir)? {
        if path == temp.path() || path == output_zip {
            continue;
        }
        let relative = path
            .strip_prefix(source_dir)
            .map_err(|err| fs_err("relativize", &path, err))?;
        let name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let metadata = fs::metadata(&path).map_err(|err| fs_err("stat", &path, err))?;
        let options = with_permissions(base, &metadata);

        if metadata.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(|err| TransferError::Archive(err.to_string()))?;
            continue;
        }

        let options = options.large_file(metadata.len() >= ZIP64_THRESHOLD);
        writer
            .start_file(name, options)
            .map_err(|err| TransferError::Archive(err.to_string()))?;
        let mut input = fs::File::open(&path).map_err(|err| fs_err("open", &path, err))?;
        io::copy(&mut input, &mut writer).map_err(|err| fs_err("pack", &path, err))?;
    }

    writer
        .finish()
        .map_err(|err| TransferError::Archive(err.to_string()))?;
    if output_zip.exists() {
        fs::remove_file(output_zip).map_err(|err| fs_err("remove", output_zip, err))?;
    }
    temp.persist(output_zip)
        .map_err(|err| fs_err("persist", output_zip, err.error))?;
    Ok(())
}

#[cfg(unix)]
fn with_permissions(options: SimpleFileOptions, metadata: &fs::Metadata) -> SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;
    options.unix_permissions(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn with_permissions(options: SimpleFileOptions, _metadata: &fs::Metadata) -> SimpleFileOptions {
    options
}

/// Copies a directory tree, creating subdirectories and overwriting files
/// that already exist at the destination.
pub fn copy_dir_recursive(source: &Path, dest: &Path) -> Result<(), TransferError> {
    if !source.is_dir() {
        return Err(TransferError::not_found("source directory", source));
    }
    fs::create_dir_all(dest).map_err(|err| fs_err("create", dest, err))?;
    for entry in walk_entries(source)? {
        let relative = entry
            .strip_prefix(source)
            .map_err(|err| fs_err("relativize", &entry, err))?;
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|err| fs_err("create", &target, err))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| fs_err("create", parent, err))?;
            }
            fs::copy(&entry, &target).map_err(|err| fs_err("copy", &entry, err))?;
        }
    }
    Ok(())
}

/// Every file and directory under `root`, depth first, siblings sorted by
/// name. Any read error aborts the walk.
pub fn walk_entries(root: &Path) -> Result<Vec<PathBuf>, TransferError> {
    let mut items = Vec::new();
    walk(root, &mut items, &mut |path, err| Err(fs_err("read", path, err)))?;
    Ok(items)
}

/// Files only, in the same deterministic order as [`walk_entries`].
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, TransferError> {
    Ok(walk_entries(root)?
        .into_iter()
        .filter(|path| path.is_file())
        .collect())
}

/// Like [`walk_files`] but unreadable directories are skipped.
pub fn walk_files_lenient(root: &Path) -> Vec<PathBuf> {
    let mut items = Vec::new();
    let _ = walk(root, &mut items, &mut |path, err| {
        tracing::debug!(path = %path.display(), %err, "skipping unreadable directory");
        Ok(())
    });
    items.retain(|path| path.is_file());
    items
}

fn walk(
    dir: &Path,
    items: &mut Vec<PathBuf>,
    on_error: &mut dyn FnMut(&Path, io::Error) -> Result<(), TransferError>,
) -> Result<(), TransferError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => return on_error(dir, err),
    };
    let mut children = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => children.push(entry.path()),
            Err(err) => on_error(dir, err)?,
        }
    }
    children.sort();
    for child in children {
        let is_dir = child.is_dir();
        items.push(child.clone());
        if is_dir {
            walk(&child, items, on_error)?;
        }
    }
    Ok(())
}

/// First directory named `name` (ASCII case-insensitive) in traversal order.
pub fn find_dir_named(root: &Path, name: &str) -> Result<Option<PathBuf>, TransferError> {
    Ok(walk_entries(root)?.into_iter().find(|path| {
        path.is_dir()
            && path
                .file_name()
                .and_then(|value| value.to_str())
                .map(|value| value.eq_ignore_ascii_case(name))
                .unwrap_or(false)
    }))
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let value = bytes as f64;
    if value >= GB {
        format!("{:.2} GB", value / GB)
    } else if value >= MB {
        format!("{:.2} MB", value / MB)
    } else if value >= KB {
        format!("{:.0} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}
