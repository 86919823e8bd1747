//! Patch ingestion
//!
//! Tearing an archive apart for storage: the manifest is parsed, each
//! `<element>` block lands under its provider at the version it applies to,
//! the identity-level record gets the elements index plus the markers needed
//! for later synthesis, and the archive's file trees are routed to whichever
//! of those directories owns them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use patchvault_core::{archive, manifest, CoreError, Patch, PatchType, PATCH_XML};

use crate::error::{RepoError, Result};
use crate::index::{self, ElementRef, ElementsIndex};
use crate::layout::{
    RepoLayout, ALLOWED_IDENTITIES_FILE, ELEMENTS_FILE, ELEMENT_XML, MISC_FILES_XML,
    TARGET_VERSION_FILE, UPDATED_VERSION_FILE,
};
use crate::{resolve, storage};

/// Stores the patch archive at `archive_path` into the repository tree and
/// returns the parsed patch.
///
/// A patch whose elements all target add-ons gets no identity-level record;
/// its unscoped files have nowhere to live and are skipped. A cumulative
/// patch may only be stored when its identity has no pending update yet, and
/// a patch id may never collide with one already stored for the same
/// identity.
pub fn add_patch(layout: &RepoLayout, archive_path: &Path) -> Result<Patch> {
    let manifest_bytes = match archive::read_entry(archive_path, PATCH_XML) {
        Ok(bytes) => bytes,
        Err(CoreError::EntryNotFound { .. }) => {
            return Err(RepoError::format(format!(
                "{} has no {PATCH_XML} entry",
                archive_path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    let manifest_text = String::from_utf8(manifest_bytes).map_err(|_| {
        RepoError::format(format!("{PATCH_XML} in {} is not UTF-8", archive_path.display()))
    })?;
    let patch = manifest::parse(&manifest_text)?;
    let identity = &patch.identity;
    let is_update = identity.patch_type() == PatchType::Cumulative;

    let record_dir = if patch.is_add_on_only() {
        None
    } else {
        let tree = if is_update {
            layout.identity_updates_dir(identity.name(), identity.version())
        } else {
            layout.identity_patches_dir(identity.name(), identity.version())
        };
        if is_update && storage::has_subdirs(&tree)? {
            return Err(RepoError::storage(format!(
                "an update is already stored for {}",
                identity.qualified_name()
            )));
        }
        let dir = tree.join(&patch.id);
        if storage::is_dir(&dir)? {
            return Err(RepoError::storage(format!(
                "patch '{}' is already stored for {}",
                patch.id,
                identity.qualified_name()
            )));
        }
        Some(dir)
    };

    // Element storage, keyed by element id for file routing below.
    let mut element_dirs: HashMap<String, PathBuf> = HashMap::new();
    let mut elements_index = ElementsIndex::new();
    for element in &patch.elements {
        let provider = &element.provider;
        let resolved =
            resolve::resolve_provider_version(layout, &provider.name, provider.is_add_on, identity)?;
        let version_dir = layout
            .provider_tree(&provider.name, provider.is_add_on, provider.patch_type)
            .join(&resolved);
        let dir = version_dir.join(&element.id);
        if storage::is_dir(&dir)? {
            return Err(RepoError::storage(format!(
                "element '{}' is already stored for provider {}",
                element.id, provider.name
            )));
        }
        // At most one successor may exist per provider version; a second
        // cumulative element for the same version would corrupt the history.
        if provider.patch_type == PatchType::Cumulative && storage::has_subdirs(&version_dir)? {
            return Err(RepoError::storage(format!(
                "provider {} already has a pending update at version {resolved}",
                provider.name
            )));
        }
        let fragment = element.fragment.as_deref().ok_or_else(|| {
            RepoError::format(format!("element '{}' carries no manifest fragment", element.id))
        })?;
        storage::write_file(&dir.join(ELEMENT_XML), format!("{fragment}\n").as_bytes())?;
        storage::write_file(&dir.join(TARGET_VERSION_FILE), format!("{resolved}\n").as_bytes())?;

        // A cumulative layer element is consumed by the identity the patch
        // produces; add-ons wait for an explicit acceptance instead.
        if provider.patch_type == PatchType::Cumulative && !provider.is_add_on {
            let consumer = format!("{}-{}", identity.name(), identity.resulting_version());
            let allow_list = layout
                .provider_updates_dir(&provider.name, false)
                .join(&resolved)
                .join(ALLOWED_IDENTITIES_FILE);
            index::append_allowed_identity(&allow_list, &consumer)?;
        }

        elements_index.insert(
            provider.name.clone(),
            ElementRef::new(element.id.clone(), resolved),
        );
        element_dirs.insert(element.id.clone(), dir);
    }

    if let Some(dir) = &record_dir {
        storage::ensure_dir(dir)?;
        elements_index.store(&dir.join(ELEMENTS_FILE))?;
        if let Some(to_version) = identity.to_version() {
            storage::write_file(
                &dir.join(UPDATED_VERSION_FILE),
                format!("{to_version}\n").as_bytes(),
            )?;
        }
        if let Some(misc) = &patch.misc_files {
            storage::write_file(&dir.join(MISC_FILES_XML), format!("{misc}\n").as_bytes())?;
        }
    }

    for (name, data) in archive::read_all_entries(archive_path)? {
        if name == PATCH_XML {
            continue;
        }
        let rel = entry_rel_name(&name)?;
        match rel.split_once('/') {
            Some((first, remainder)) if element_dirs.contains_key(first) => {
                storage::write_file(&join_rel(&element_dirs[first], remainder), &data)?;
            }
            _ => match &record_dir {
                Some(dir) => storage::write_file(&join_rel(dir, rel), &data)?,
                None => {
                    tracing::debug!(
                        patch = %patch.id,
                        entry = %rel,
                        "skipping unscoped entry of an add-on only patch"
                    );
                }
            },
        }
    }

    Ok(patch)
}

/// Validates an archive entry name before it is turned into a path under the
/// repository root.
fn entry_rel_name(name: &str) -> Result<&str> {
    let clean = name.strip_prefix("./").unwrap_or(name);
    if clean.is_empty()
        || clean.starts_with('/')
        || clean.split('/').any(|c| c.is_empty() || c == "..")
    {
        return Err(RepoError::format(format!("unsafe archive entry name '{name}'")));
    }
    Ok(clean)
}

fn join_rel(dir: &Path, rel: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    for component in rel.split('/') {
        path.push(component);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchvault_core::ArchiveWriter;
    use tempfile::TempDir;

    fn write_archive(dir: &Path, manifest: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("patch.tar.gz");
        let mut writer = ArchiveWriter::create(&path).unwrap();
        writer.add_bytes(PATCH_XML, manifest.as_bytes()).unwrap();
        for (name, content) in files {
            writer.add_bytes(name, content).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    const ONE_OFF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<patch id="oneoff1">
    <no-upgrade name="product" version="1.0.1"/>
    <elements>
        <element id="base-patch1" patch-type="no-upgrade">
            <provider name="base"/>
        </element>
    </elements>
</patch>
"#;

    const UPDATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<patch id="cp1">
    <upgrade name="product" version="1.0.1" to-version="1.0.2"/>
    <elements>
        <element id="base-cp1" patch-type="upgrade">
            <provider name="base"/>
        </element>
    </elements>
</patch>
"#;

    const ADD_ON_ONLY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<patch id="addon1-patch1">
    <no-upgrade name="product" version="1.0.1"/>
    <elements>
        <element id="addon1-patch1" patch-type="no-upgrade">
            <provider name="addon1" add-on="true"/>
        </element>
    </elements>
</patch>
"#;

    #[test]
    fn one_off_lands_in_both_trees() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        let layout = RepoLayout::new(&repo);
        let archive_path = write_archive(
            temp.path(),
            ONE_OFF,
            &[
                ("base-patch1/bin/run.sh", b"#!/bin/sh\n"),
                ("README.txt", b"read me"),
            ],
        );

        let patch = add_patch(&layout, &archive_path).unwrap();
        assert_eq!(patch.id, "oneoff1");

        let element_dir = repo.join("layers/base/patches/base/base-patch1");
        assert!(element_dir.join(ELEMENT_XML).is_file());
        assert_eq!(
            storage::read_marker(&element_dir.join(TARGET_VERSION_FILE)).unwrap(),
            "base"
        );
        assert!(element_dir.join("bin/run.sh").is_file());

        let record = repo.join("product-1.0.1/patches/oneoff1");
        assert!(record.join("README.txt").is_file());
        let stored = ElementsIndex::load(&record.join(ELEMENTS_FILE)).unwrap();
        assert_eq!(
            stored.iter().next().unwrap(),
            ("base", &ElementRef::new("base-patch1", "base"))
        );
    }

    #[test]
    fn duplicate_patch_id_is_rejected() {
        let temp = TempDir::new().unwrap();
        let layout = RepoLayout::new(temp.path().join("repo"));
        let archive_path = write_archive(temp.path(), ONE_OFF, &[]);

        add_patch(&layout, &archive_path).unwrap();
        assert!(matches!(
            add_patch(&layout, &archive_path).unwrap_err(),
            RepoError::Storage { .. }
        ));
    }

    #[test]
    fn update_records_markers_and_allow_list() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        let layout = RepoLayout::new(&repo);
        let archive_path = write_archive(temp.path(), UPDATE, &[]);

        add_patch(&layout, &archive_path).unwrap();

        let record = repo.join("product-1.0.1/updates/cp1");
        assert_eq!(
            storage::read_marker(&record.join(UPDATED_VERSION_FILE)).unwrap(),
            "1.0.2"
        );
        // The produced identity may consume the layer update.
        let allowed = index::load_allowed_identities(
            &repo.join("layers/base/updates/base").join(ALLOWED_IDENTITIES_FILE),
        )
        .unwrap();
        assert_eq!(allowed, vec!["product-1.0.2"]);
    }

    #[test]
    fn second_update_for_the_same_identity_is_rejected() {
        let temp = TempDir::new().unwrap();
        let layout = RepoLayout::new(temp.path().join("repo"));
        add_patch(&layout, &write_archive(temp.path(), UPDATE, &[])).unwrap();

        let other = UPDATE.replace("cp1", "cp2").replace("base-cp1", "base-cp2");
        let second = temp.path().join("second");
        std::fs::create_dir(&second).unwrap();
        assert!(matches!(
            add_patch(&layout, &write_archive(&second, &other, &[])).unwrap_err(),
            RepoError::Storage { .. }
        ));
    }

    #[test]
    fn second_successor_for_one_provider_version_is_rejected() {
        // Both updates target addon1 at base, so neither trips the
        // identity-level check; the provider history itself must refuse a
        // second successor rather than end up corrupt.
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        let layout = RepoLayout::new(&repo);
        let addon_update = |element_id: &str| {
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<patch id="{element_id}">
    <no-upgrade name="product" version="1.0.1"/>
    <elements>
        <element id="{element_id}" patch-type="upgrade">
            <provider name="addon1" add-on="true"/>
        </element>
    </elements>
</patch>
"#
            )
        };
        add_patch(&layout, &write_archive(temp.path(), &addon_update("addon1-1.1"), &[])).unwrap();

        let second = temp.path().join("second");
        std::fs::create_dir(&second).unwrap();
        assert!(matches!(
            add_patch(&layout, &write_archive(&second, &addon_update("addon1-1.2"), &[]))
                .unwrap_err(),
            RepoError::Storage { .. }
        ));
        // The first successor is the only one on disk.
        assert_eq!(
            storage::subdirs(&repo.join("addons/addon1/updates/base"))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn element_path_collision_is_a_storage_error() {
        // An add-on only patch has no identity record, so the element
        // directory itself is the collision guard.
        let temp = TempDir::new().unwrap();
        let layout = RepoLayout::new(temp.path().join("repo"));
        let archive_path = write_archive(temp.path(), ADD_ON_ONLY, &[]);

        add_patch(&layout, &archive_path).unwrap();
        assert!(matches!(
            add_patch(&layout, &archive_path).unwrap_err(),
            RepoError::Storage { .. }
        ));
    }

    #[test]
    fn add_on_only_patch_has_no_identity_record() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        let layout = RepoLayout::new(&repo);
        let archive_path = write_archive(
            temp.path(),
            ADD_ON_ONLY,
            &[
                ("addon1-patch1/lib/fix.jar", b"fix"),
                ("loose.txt", b"dropped"),
            ],
        );

        add_patch(&layout, &archive_path).unwrap();
        assert!(repo
            .join("addons/addon1/patches/base/addon1-patch1/lib/fix.jar")
            .is_file());
        assert!(!repo.join("product-1.0.1").exists());
    }

    #[test]
    fn missing_manifest_is_a_format_error() {
        let temp = TempDir::new().unwrap();
        let layout = RepoLayout::new(temp.path().join("repo"));
        let path = temp.path().join("empty.tar.gz");
        let mut writer = ArchiveWriter::create(&path).unwrap();
        writer.add_bytes("README.txt", b"no manifest").unwrap();
        writer.finish().unwrap();

        assert!(matches!(
            add_patch(&layout, &path).unwrap_err(),
            RepoError::Format { .. }
        ));
    }

    #[test]
    fn traversal_entry_names_are_rejected() {
        assert!(entry_rel_name("../escape.txt").is_err());
        assert!(entry_rel_name("a/../b").is_err());
        assert!(entry_rel_name("/abs").is_err());
        assert_eq!(entry_rel_name("./ok/file.txt").unwrap(), "ok/file.txt");
    }
}
