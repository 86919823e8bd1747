//! Reading and writing `.tar.gz` patch containers
//!
//! A patch archive holds a `patch.xml` manifest at its root, one top-level
//! directory per element id with that element's file tree, and loose
//! top-level files for unscoped content. Bundles use the same container
//! format. Entries are written with fixed mode and epoch mtime so repeated
//! builds of the same content produce identical archives.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tar::{Archive, Builder, Header};

use crate::error::{CoreError, Result};

/// Information about one entry in an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Relative path within the archive
    pub path: String,
    /// Entry size in bytes
    pub size: u64,
    /// Whether this is a directory entry
    pub is_dir: bool,
}

fn open(path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let file = File::open(path).map_err(|e| {
        CoreError::archive(format!("cannot open {}: {e}", path.display()))
    })?;
    Ok(Archive::new(GzDecoder::new(file)))
}

/// Lists the entries of an archive without extracting them.
pub fn list_entries(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut archive = open(path)?;
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let entry = entry.map_err(|e| {
            CoreError::archive(format!("{} is not readable: {e}", path.display()))
        })?;
        entries.push(ArchiveEntry {
            path: entry.path()?.to_string_lossy().to_string(),
            size: entry.header().size()?,
            is_dir: entry.header().entry_type().is_dir(),
        });
    }
    Ok(entries)
}

/// Reads a single named entry out of an archive.
pub fn read_entry(path: &Path, name: &str) -> Result<Vec<u8>> {
    let mut archive = open(path)?;
    for entry in archive.entries()? {
        let mut entry = entry.map_err(|e| {
            CoreError::archive(format!("{} is not readable: {e}", path.display()))
        })?;
        if entry.path()?.to_string_lossy() == name {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            return Ok(content);
        }
    }
    Err(CoreError::EntryNotFound {
        entry: name.to_string(),
    })
}

/// Reads every file entry of an archive in a single pass, in archive order.
/// Directory entries are skipped.
pub fn read_all_entries(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = open(path)?;
    let mut contents = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry.map_err(|e| {
            CoreError::archive(format!("{} is not readable: {e}", path.display()))
        })?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        contents.push((name, data));
    }
    Ok(contents)
}

/// Streaming writer for a `.tar.gz` archive.
pub struct ArchiveWriter {
    builder: Builder<GzEncoder<File>>,
}

impl ArchiveWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        Ok(ArchiveWriter {
            builder: Builder::new(encoder),
        })
    }

    /// Adds one entry with the given content.
    pub fn add_bytes(&mut self, name: &str, content: &[u8]) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        self.builder.append_data(&mut header, name, content)?;
        Ok(())
    }

    /// Adds an entry with the content of a file on disk.
    pub fn add_file(&mut self, src: &Path, name: &str) -> Result<()> {
        let content = std::fs::read(src)?;
        self.add_bytes(name, &content)
    }

    /// Flushes and closes the archive.
    pub fn finish(self) -> Result<()> {
        let encoder = self.builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    }
}
