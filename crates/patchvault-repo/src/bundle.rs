//! Multi-patch bundle containers
//!
//! A bundle is a `.tar.gz` holding each input patch archive verbatim under
//! its file name, plus a `patch-bundle.xml` index recording the application
//! order as `(patch id, file name)` pairs. Inputs are not deduplicated; a
//! file added twice appears twice, in both the container and the index.

use std::path::{Path, PathBuf};

use patchvault_core::{archive, manifest, ArchiveWriter, PATCH_XML};

use crate::error::{RepoError, Result};

/// Name of the index entry at the root of every bundle.
pub const BUNDLE_XML: &str = "patch-bundle.xml";

/// One line of a bundle index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub patch_id: String,
    pub file_name: String,
}

/// The ordered index of a bundle. Order is application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleIndex {
    pub entries: Vec<BundleEntry>,
}

impl BundleIndex {
    pub fn render(&self) -> String {
        let mut out = String::from("<patch-bundle>\n");
        for entry in &self.entries {
            out.push_str(&format!(
                "    <patch id=\"{}\" file=\"{}\"/>\n",
                entry.patch_id, entry.file_name
            ));
        }
        out.push_str("</patch-bundle>\n");
        out
    }

    /// Parses a rendered index. The format is line oriented, one `<patch>`
    /// per line.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if !line.starts_with("<patch ") {
                continue;
            }
            let patch_id = attr_value(line, "id").ok_or_else(|| {
                RepoError::format(format!("bundle index line without an id: {line}"))
            })?;
            let file_name = attr_value(line, "file").ok_or_else(|| {
                RepoError::format(format!("bundle index line without a file: {line}"))
            })?;
            entries.push(BundleEntry {
                patch_id,
                file_name,
            });
        }
        Ok(BundleIndex { entries })
    }
}

fn attr_value(line: &str, name: &str) -> Option<String> {
    let key = format!("{name}=\"");
    let start = line.find(&key)? + key.len();
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_string())
}

/// Collects patch archives and writes them out as one bundle.
#[derive(Debug, Default)]
pub struct BundleBuilder {
    files: Vec<PathBuf>,
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.files.push(path.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Writes the bundle to `target`, returning its index, or `Ok(None)`
    /// without touching `target` when no input was added.
    ///
    /// The bundle is written to a temporary sibling file and moved into
    /// place, so a failed build never leaves a truncated bundle at `target`.
    /// With `delete_inputs` the input archives are removed afterwards; a
    /// failed removal is logged, not fatal.
    pub fn build(&self, target: &Path, delete_inputs: bool) -> Result<Option<BundleIndex>> {
        if target.is_dir() {
            return Err(RepoError::bundle(format!(
                "bundle target {} is a directory",
                target.display()
            )));
        }
        if self.files.is_empty() {
            return Ok(None);
        }

        let parent = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".patch-bundle")
            .tempfile_in(parent)
            .map_err(|e| {
                RepoError::bundle_io(
                    format!("cannot create a temporary file next to {}", target.display()),
                    e,
                )
            })?;
        let mut writer = ArchiveWriter::create(temp.path())
            .map_err(|e| RepoError::bundle(format!("cannot open bundle for writing: {e}")))?;

        let mut entries = Vec::new();
        for file in &self.files {
            if !file.is_file() {
                return Err(RepoError::bundle(format!(
                    "bundled patch file does not exist: {}",
                    file.display()
                )));
            }
            let manifest_bytes = archive::read_entry(file, PATCH_XML).map_err(|e| {
                RepoError::bundle(format!("cannot read manifest of {}: {e}", file.display()))
            })?;
            let manifest_text = String::from_utf8(manifest_bytes).map_err(|_| {
                RepoError::bundle(format!("manifest of {} is not UTF-8", file.display()))
            })?;
            let patch = manifest::parse(&manifest_text).map_err(|e| {
                RepoError::bundle(format!("cannot parse manifest of {}: {e}", file.display()))
            })?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    RepoError::bundle(format!("{} has no file name", file.display()))
                })?;

            writer.add_file(file, &file_name).map_err(|e| {
                RepoError::bundle(format!("cannot bundle {}: {e}", file.display()))
            })?;
            entries.push(BundleEntry {
                patch_id: patch.id,
                file_name,
            });
        }

        let index = BundleIndex { entries };
        writer
            .add_bytes(BUNDLE_XML, index.render().as_bytes())
            .and_then(|()| writer.finish())
            .map_err(|e| RepoError::bundle(format!("cannot finish bundle: {e}")))?;
        temp.persist(target).map_err(|e| {
            RepoError::bundle_io(
                format!("cannot move bundle into place at {}", target.display()),
                e.error,
            )
        })?;

        if delete_inputs {
            for file in &self.files {
                if let Err(e) = std::fs::remove_file(file) {
                    tracing::warn!(file = %file.display(), "cannot delete bundled input: {e}");
                }
            }
        }
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_patch_archive(dir: &Path, file_name: &str, patch_id: &str) -> PathBuf {
        let path = dir.join(file_name);
        let manifest = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<patch id=\"{patch_id}\">\n    <no-upgrade name=\"product\" version=\"1.0.1\"/>\n    <elements>\n    </elements>\n</patch>\n"
        );
        let mut writer = ArchiveWriter::create(&path).unwrap();
        writer.add_bytes(PATCH_XML, manifest.as_bytes()).unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn empty_builder_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("bundle.tar.gz");
        let index = BundleBuilder::new().build(&target, false).unwrap();
        assert!(index.is_none());
        assert!(!target.exists());
    }

    #[test]
    fn bundle_holds_inputs_and_index() {
        let temp = TempDir::new().unwrap();
        let a = write_patch_archive(temp.path(), "product-1.0.1-cp1.tar.gz", "cp1");
        let b = write_patch_archive(temp.path(), "product-1.0.2-oneoff.tar.gz", "oneoff");
        let target = temp.path().join("bundle.tar.gz");

        let mut builder = BundleBuilder::new();
        builder.add(&a).add(&b);
        let index = builder.build(&target, false).unwrap().unwrap();

        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[0].patch_id, "cp1");
        assert_eq!(index.entries[1].file_name, "product-1.0.2-oneoff.tar.gz");

        let stored = archive::read_entry(&target, BUNDLE_XML).unwrap();
        let reparsed = BundleIndex::parse(std::str::from_utf8(&stored).unwrap()).unwrap();
        assert_eq!(reparsed, index);

        // Inputs are carried verbatim.
        let entries = archive::list_entries(&target).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "product-1.0.1-cp1.tar.gz",
                "product-1.0.2-oneoff.tar.gz",
                BUNDLE_XML
            ]
        );
    }

    #[test]
    fn duplicate_inputs_are_bundled_twice() {
        let temp = TempDir::new().unwrap();
        let a = write_patch_archive(temp.path(), "product-1.0.1-cp1.tar.gz", "cp1");
        let target = temp.path().join("bundle.tar.gz");

        let mut builder = BundleBuilder::new();
        builder.add(&a).add(&a);
        let index = builder.build(&target, false).unwrap().unwrap();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[0], index.entries[1]);
    }

    #[test]
    fn directory_target_is_rejected() {
        let temp = TempDir::new().unwrap();
        let a = write_patch_archive(temp.path(), "product-1.0.1-cp1.tar.gz", "cp1");

        let mut builder = BundleBuilder::new();
        builder.add(&a);
        let err = builder.build(temp.path(), false).unwrap_err();
        assert!(matches!(err, RepoError::BundleIo { .. }));
    }

    #[test]
    fn missing_input_is_rejected() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("bundle.tar.gz");

        let mut builder = BundleBuilder::new();
        builder.add(temp.path().join("nope.tar.gz"));
        let err = builder.build(&target, false).unwrap_err();
        assert!(matches!(err, RepoError::BundleIo { .. }));
        assert!(!target.exists());
    }

    #[test]
    fn delete_inputs_removes_sources() {
        let temp = TempDir::new().unwrap();
        let a = write_patch_archive(temp.path(), "product-1.0.1-cp1.tar.gz", "cp1");
        let target = temp.path().join("bundle.tar.gz");

        let mut builder = BundleBuilder::new();
        builder.add(&a);
        builder.build(&target, true).unwrap().unwrap();
        assert!(!a.exists());
        assert!(target.exists());
    }
}
