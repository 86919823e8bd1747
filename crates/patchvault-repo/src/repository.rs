//! The repository facade
//!
//! [`PatchRepository`] ties the pieces together: ingestion tears incoming
//! archives apart for storage, retrieval re-synthesizes them, and the update
//! chain walker turns stored updates into bundles. Mutating operations
//! serialize on an internal lock; reads run concurrently and only ever see
//! whole files.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use patchvault_core::{Identity, Patch, PatchType};

use crate::bundle::{BundleBuilder, BundleIndex};
use crate::error::{RepoError, Result};
use crate::layout::{RepoLayout, ALLOWED_IDENTITIES_FILE, UPDATED_VERSION_FILE};
use crate::{chain, index, ingest, resolve, storage, synth};

/// A patch repository rooted at one directory. The directory is created
/// lazily by the first patch stored into it.
#[derive(Debug)]
pub struct PatchRepository {
    layout: RepoLayout,
    write_lock: Mutex<()>,
}

impl PatchRepository {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        PatchRepository {
            layout: RepoLayout::new(root),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| RepoError::storage("repository write lock is poisoned"))
    }

    /// Stores the patch archive at `archive_path` and returns its parsed
    /// manifest. Not atomic: a failure mid-ingestion can leave a partially
    /// written tree behind.
    pub fn add_patch(&self, archive_path: &Path) -> Result<Patch> {
        if !archive_path.is_file() {
            return Err(RepoError::invalid_argument(format!(
                "{} is not a patch archive file",
                archive_path.display()
            )));
        }
        let _guard = self.write_guard()?;
        ingest::add_patch(&self.layout, archive_path)
    }

    /// Accepts the identity `{name}-{version}` as a consumer of the add-on
    /// update recorded at `update_version`. Until accepted, an add-on update
    /// neither shows up in [`PatchRepository::has_add_on_updates`] nor gets
    /// merged into the identity's synthesized updates.
    ///
    /// Accepting against an update version that is not in the repository is
    /// an error unless `create_if_missing` pre-registers it.
    pub fn accept_add_on_for_identity(
        &self,
        add_on: &str,
        update_version: &str,
        name: &str,
        version: &str,
        create_if_missing: bool,
    ) -> Result<()> {
        let _guard = self.write_guard()?;
        let dir = self
            .layout
            .provider_updates_dir(add_on, true)
            .join(update_version);
        if !storage::is_dir(&dir)? && !create_if_missing {
            return Err(RepoError::not_found(format!(
                "add-on {add_on} has no update recorded at version {update_version}"
            )));
        }
        let allow_list = dir.join(ALLOWED_IDENTITIES_FILE);
        let consumer = format!("{name}-{version}");
        if index::load_allowed_identities(&allow_list)?
            .iter()
            .any(|a| a == &consumer)
        {
            return Ok(());
        }
        index::append_allowed_identity(&allow_list, &consumer)
    }

    /// Whether any one-off patch is stored for the identity itself.
    pub fn has_patches(&self, name: &str, version: &str) -> Result<bool> {
        storage::has_subdirs(&self.layout.identity_patches_dir(name, version))
    }

    /// Whether an update is pending for the identity.
    pub fn has_update(&self, name: &str, version: &str) -> Result<bool> {
        storage::has_subdirs(&self.layout.identity_updates_dir(name, version))
    }

    /// Whether any one-off add-on patch applies to the identity.
    pub fn has_add_on_patches(&self, identity: &Identity) -> Result<bool> {
        Ok(!self.add_on_patch_ids(identity)?.is_empty())
    }

    /// Whether any of the identity's add-ons has a pending update the
    /// identity was accepted for.
    pub fn has_add_on_updates(&self, identity: &Identity) -> Result<bool> {
        for add_on in identity.add_ons() {
            if resolve::provider_update_for(
                &self.layout,
                &add_on.name,
                true,
                &add_on.version,
                identity,
            )?
            .is_some()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The one-off patches stored for the identity itself, re-synthesized,
    /// in stable order. Add-on one-offs are not included.
    pub fn get_patches_info(&self, identity: &Identity) -> Result<Vec<Patch>> {
        let dir = self
            .layout
            .identity_patches_dir(identity.name(), identity.version());
        let mut patches = Vec::new();
        for (patch_id, _) in storage::subdirs(&dir)? {
            patches.push(synth::synthesize_stored(&self.layout, identity, &patch_id, false)?.patch);
        }
        Ok(patches)
    }

    /// The one-off add-on patches applicable to the identity, re-synthesized.
    /// An identity that carries add-ons is answered from their recorded
    /// versions; one without is answered from every stored add-on version.
    pub fn get_add_on_patches_info(&self, identity: &Identity) -> Result<Vec<Patch>> {
        let mut patches = Vec::new();
        for patch_id in self.add_on_patch_ids(identity)? {
            patches.push(synth::synthesize_add_on_patch(&self.layout, identity, &patch_id)?.patch);
        }
        Ok(patches)
    }

    /// The identity's pending update, re-synthesized, if any.
    pub fn get_update_info(&self, identity: &Identity) -> Result<Option<Patch>> {
        match self.pending_update(identity)? {
            Some((update_id, _)) => Ok(Some(
                synth::synthesize_stored(&self.layout, identity, &update_id, true)?.patch,
            )),
            None => Ok(None),
        }
    }

    /// Materializes a stored patch of the identity into `output` and returns
    /// its parsed manifest.
    pub fn get_patch(
        &self,
        identity: &Identity,
        patch_id: &str,
        is_update: bool,
        output: &Path,
    ) -> Result<Patch> {
        let synthesized = synth::synthesize_stored(&self.layout, identity, patch_id, is_update)?;
        chain::materialize(&synthesized, output)?;
        Ok(synthesized.patch)
    }

    /// Materializes a one-off add-on patch into `output`.
    pub fn get_add_on_patch(
        &self,
        identity: &Identity,
        patch_id: &str,
        output: &Path,
    ) -> Result<Patch> {
        let synthesized = synth::synthesize_add_on_patch(&self.layout, identity, patch_id)?;
        chain::materialize(&synthesized, output)?;
        Ok(synthesized.patch)
    }

    /// Bundles the update chain from the identity into `output`: up to
    /// exactly `to_version` when given, to the end of the chain otherwise.
    /// A chain that cannot reach its target fails with
    /// [`RepoError::ChainIncomplete`] naming the latest reachable version.
    /// The target is only evaluated after a hop, so asking for the version
    /// the identity is already at fails the same way.
    pub fn get_update(
        &self,
        identity: &Identity,
        to_version: Option<&str>,
        include_patches: bool,
        output: &Path,
    ) -> Result<Option<BundleIndex>> {
        chain::walk(&self.layout, identity, to_version, include_patches, output)
    }

    /// Bundles the whole update chain from the identity to its end.
    pub fn get_update_to_latest(
        &self,
        identity: &Identity,
        include_patches: bool,
        output: &Path,
    ) -> Result<Option<BundleIndex>> {
        chain::walk(&self.layout, identity, None, include_patches, output)
    }

    /// Bundles only the next hop of the identity's update chain, or
    /// `Ok(None)` when no update is pending.
    pub fn get_update_to_next(
        &self,
        identity: &Identity,
        include_patches: bool,
        output: &Path,
    ) -> Result<Option<BundleIndex>> {
        let Some((_, dir)) = self.pending_update(identity)? else {
            return Ok(None);
        };
        let to_version = storage::read_marker(&dir.join(UPDATED_VERSION_FILE))?;
        chain::walk(&self.layout, identity, Some(&to_version), include_patches, output)
    }

    /// Bundles every one-off patch stored for the identity into
    /// `target_dir/{name}-{version}-patches.tar.gz` and returns the bundle
    /// path, or `Ok(None)` when the identity has no one-off patches.
    pub fn bundle_patches(&self, identity: &Identity, target_dir: &Path) -> Result<Option<PathBuf>> {
        let staging = tempfile::tempdir()
            .map_err(|e| RepoError::storage_io("cannot create a staging directory", e))?;
        let patches_dir = self
            .layout
            .identity_patches_dir(identity.name(), identity.version());

        let mut builder = BundleBuilder::new();
        for (patch_id, _) in storage::subdirs(&patches_dir)? {
            let synthesized = synth::synthesize_stored(&self.layout, identity, &patch_id, false)?;
            let path = staging
                .path()
                .join(chain::archive_file_name(identity, &patch_id));
            chain::materialize(&synthesized, &path)?;
            builder.add(path);
        }

        let target = target_dir.join(format!("{}-patches.tar.gz", identity.qualified_name()));
        Ok(builder.build(&target, false)?.map(|_| target))
    }

    /// Bundles arbitrary patch archives in the given order. With
    /// `delete_sources` the inputs are removed after the bundle is in place.
    pub fn bundle_files(
        &self,
        files: &[PathBuf],
        target: &Path,
        delete_sources: bool,
    ) -> Result<Option<BundleIndex>> {
        let mut builder = BundleBuilder::new();
        for file in files {
            builder.add(file);
        }
        builder.build(target, delete_sources)
    }

    /// The single pending update of the identity, as `(update id, dir)`.
    fn pending_update(&self, identity: &Identity) -> Result<Option<(String, PathBuf)>> {
        let updates = storage::subdirs(
            &self
                .layout
                .identity_updates_dir(identity.name(), identity.version()),
        )?;
        if updates.len() > 1 {
            return Err(RepoError::storage(format!(
                "{} pending updates stored for {}, expected at most one",
                updates.len(),
                identity.qualified_name()
            )));
        }
        Ok(updates.into_iter().next())
    }

    fn add_on_patch_ids(&self, identity: &Identity) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if identity.has_add_ons() {
            for add_on in identity.add_ons() {
                let dir = self
                    .layout
                    .provider_tree(&add_on.name, true, PatchType::OneOff)
                    .join(&add_on.version);
                for (id, _) in storage::subdirs(&dir)? {
                    ids.push(id);
                }
            }
        } else {
            for (name, _) in storage::subdirs(&self.layout.providers_dir(true))? {
                let patches = self.layout.provider_tree(&name, true, PatchType::OneOff);
                for (_, version_dir) in storage::subdirs(&patches)? {
                    for (id, _) in storage::subdirs(&version_dir)? {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }
}
