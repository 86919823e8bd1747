//! Thin filesystem capability
//!
//! All repository I/O funnels through these helpers so every failure surfaces
//! as a [`RepoError::Storage`] with the offending path in the message. No
//! locking, no transactions: a failure mid-operation can leave the tree
//! partially written.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{RepoError, Result};

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        RepoError::storage_io(format!("failed to create directory {}", path.display()), e)
    })
}

pub fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, content)
        .map_err(|e| RepoError::storage_io(format!("failed to write {}", path.display()), e))
}

pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| RepoError::storage_io(format!("failed to read {}", path.display()), e))
}

/// Reads a one-line marker file (e.g. a version string).
pub fn read_marker(path: &Path) -> Result<String> {
    Ok(read_to_string(path)?.trim().to_string())
}

pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RepoError::storage_io(format!("failed to open {}", path.display()), e))?;
    writeln!(file, "{line}")
        .map_err(|e| RepoError::storage_io(format!("failed to write {}", path.display()), e))
}

/// Whether `path` is an existing directory. An existing non-directory is a
/// corrupt repository, not `false`.
pub fn is_dir(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(true),
        Ok(_) => Err(RepoError::storage(format!(
            "found a file where a directory was expected: {}",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(RepoError::storage_io(
            format!("failed to stat {}", path.display()),
            e,
        )),
    }
}

/// Sorted subdirectories of `path`. A missing path yields an empty list.
pub fn subdirs(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !is_dir(path)? {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let entries = fs::read_dir(path)
        .map_err(|e| RepoError::storage_io(format!("failed to list {}", path.display()), e))?;
    for entry in entries {
        let entry = entry
            .map_err(|e| RepoError::storage_io(format!("failed to list {}", path.display()), e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| RepoError::storage_io(format!("failed to stat {}", path.display()), e))?;
        if file_type.is_dir() {
            out.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
    }
    out.sort();
    Ok(out)
}

pub fn has_subdirs(path: &Path) -> Result<bool> {
    Ok(!subdirs(path)?.is_empty())
}

/// Regular files under `dir` with their root-relative slash-separated names,
/// in stable (sorted) walk order. A missing directory yields an empty list.
pub fn files_under(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut out = Vec::new();
    if !is_dir(dir)? {
        return Ok(out);
    }
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry
            .map_err(|e| RepoError::storage(format!("failed to walk {}: {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| RepoError::storage(format!("walk escaped {}", dir.display())))?;
        let name = rel
            .iter()
            .map(|c| c.to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push((entry.path().to_path_buf(), name));
    }
    Ok(out)
}
