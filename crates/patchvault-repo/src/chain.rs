//! Update chain traversal and patch materialization
//!
//! A stored update names the version it advances its identity to; walking the
//! chain means materializing the single pending update of the current
//! identity, hopping to the resulting version and repeating. Each hop yields
//! one patch archive, collected into a bundle.

use std::path::{Path, PathBuf};

use patchvault_core::{ArchiveWriter, Identity, Patch, PATCH_XML};

use crate::bundle::{BundleBuilder, BundleIndex};
use crate::error::{RepoError, Result};
use crate::layout::{
    RepoLayout, ELEMENTS_FILE, ELEMENT_XML, MISC_FILES_XML, TARGET_VERSION_FILE,
    UPDATED_VERSION_FILE,
};
use crate::synth::{self, Synthesized};
use crate::storage;

/// The archive file name a materialized patch is given.
pub fn archive_file_name(identity: &Identity, patch_id: &str) -> String {
    format!("{}-{}-{patch_id}.tar.gz", identity.name(), identity.version())
}

/// Writes a synthesized patch out as a `.tar.gz` archive: the manifest at
/// the root, each element's file tree under its element id, and the
/// identity-level loose files at top level. Storage-internal records are
/// left out.
pub fn materialize(synthesized: &Synthesized, output: &Path) -> Result<()> {
    let mut writer = ArchiveWriter::create(output)?;
    writer.add_bytes(PATCH_XML, synthesized.manifest.as_bytes())?;

    if let Some(stored_dir) = &synthesized.stored_dir {
        for (path, name) in storage::files_under(stored_dir)? {
            if matches!(
                name.as_str(),
                ELEMENTS_FILE | UPDATED_VERSION_FILE | MISC_FILES_XML
            ) {
                continue;
            }
            writer.add_file(&path, &name)?;
        }
    }
    for element in &synthesized.elements {
        for (path, name) in storage::files_under(&element.dir)? {
            if name == ELEMENT_XML || name == TARGET_VERSION_FILE {
                continue;
            }
            writer.add_file(&path, &format!("{}/{name}", element.element_id))?;
        }
    }
    writer.finish()?;
    Ok(())
}

/// Materializes the single pending update of `identity` into `out_dir`, or
/// `Ok(None)` when the identity has no pending update. Two updates on disk
/// for one identity version is a corrupt repository.
pub fn update_only(
    layout: &RepoLayout,
    identity: &Identity,
    out_dir: &Path,
) -> Result<Option<(PathBuf, Patch)>> {
    let updates = storage::subdirs(&layout.identity_updates_dir(identity.name(), identity.version()))?;
    match updates.len() {
        0 => Ok(None),
        1 => {
            let (update_id, _) = &updates[0];
            let synthesized = synth::synthesize_stored(layout, identity, update_id, true)?;
            let path = out_dir.join(archive_file_name(identity, update_id));
            materialize(&synthesized, &path)?;
            Ok(Some((path, synthesized.patch)))
        }
        n => Err(RepoError::storage(format!(
            "{n} pending updates stored for {}, expected at most one",
            identity.qualified_name()
        ))),
    }
}

/// Walks the update chain from `identity` and bundles the materialized hops
/// into `output`.
///
/// With a target version the walk must reach it exactly, otherwise the error
/// reports the latest version that was reached. Without one the walk stops at
/// the end of the chain. With `include_patches` every one-off patch stored
/// for the final identity is appended after the updates. An empty walk writes
/// nothing and returns `Ok(None)`.
pub fn walk(
    layout: &RepoLayout,
    identity: &Identity,
    to_version: Option<&str>,
    include_patches: bool,
    output: &Path,
) -> Result<Option<BundleIndex>> {
    let staging = tempfile::tempdir().map_err(|e| {
        RepoError::storage_io("cannot create a staging directory", e)
    })?;

    let mut builder = BundleBuilder::new();
    let mut current = identity.clone();
    let mut reached = false;
    while !reached {
        let Some((path, patch)) = update_only(layout, &current, staging.path())? else {
            break;
        };
        let next = patch
            .identity
            .to_version()
            .ok_or_else(|| {
                RepoError::storage(format!(
                    "stored update {} does not name a resulting version",
                    patch.id
                ))
            })?
            .to_string();
        builder.add(path);
        current = current.advanced_to(next);
        reached = to_version == Some(current.version());
    }
    if let Some(target) = to_version {
        if !reached {
            return Err(RepoError::ChainIncomplete {
                target: target.to_string(),
                latest: current.version().to_string(),
            });
        }
    }

    if include_patches {
        let patches_dir = layout.identity_patches_dir(current.name(), current.version());
        for (patch_id, _) in storage::subdirs(&patches_dir)? {
            let synthesized = synth::synthesize_stored(layout, &current, &patch_id, false)?;
            let path = staging.path().join(archive_file_name(&current, &patch_id));
            materialize(&synthesized, &path)?;
            builder.add(path);
        }
    }

    builder.build(output, false)
}
