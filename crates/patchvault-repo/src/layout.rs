//! On-disk layout of a repository root
//!
//! ```text
//! ROOT
//! |-- layers/<provider>/patches/<version>/<elementId>/{element.xml, target-version.txt, files...}
//! |-- layers/<provider>/updates/<version>/<elementId>/{element.xml, target-version.txt, files...}
//! |-- addons/<addon>/...                        (same shape as layers)
//! |-- addons/<addon>/updates/<version>/allowed-identities.txt
//! |-- <identity>-<version>/patches/<patchId>/{elements.txt, misc-files.xml?, files...}
//! `-- <identity>-<version>/updates/<updateId>/{elements.txt, updated-version.txt, misc-files.xml?, files...}
//! ```

use std::path::{Path, PathBuf};

use patchvault_core::PatchType;

use crate::error::{Result, RepoError};
use crate::index::ElementRef;
use crate::storage;

pub const LAYERS_DIR: &str = "layers";
pub const ADDONS_DIR: &str = "addons";
pub const PATCHES_DIR: &str = "patches";
pub const UPDATES_DIR: &str = "updates";

pub const ELEMENTS_FILE: &str = "elements.txt";
pub const ELEMENT_XML: &str = "element.xml";
pub const TARGET_VERSION_FILE: &str = "target-version.txt";
pub const UPDATED_VERSION_FILE: &str = "updated-version.txt";
pub const ALLOWED_IDENTITIES_FILE: &str = "allowed-identities.txt";
pub const MISC_FILES_XML: &str = "misc-files.xml";

/// Path schema for one repository root. Pure path arithmetic except for
/// [`RepoLayout::find_element_dir`], which probes the four possible trees.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    root: PathBuf,
}

/// Where an element referenced by an identity's index was found on disk.
#[derive(Debug, Clone)]
pub struct ElementLocation {
    pub dir: PathBuf,
    pub is_add_on: bool,
    pub cumulative: bool,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RepoLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identity_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(format!("{name}-{version}"))
    }

    pub fn identity_patches_dir(&self, name: &str, version: &str) -> PathBuf {
        self.identity_dir(name, version).join(PATCHES_DIR)
    }

    pub fn identity_updates_dir(&self, name: &str, version: &str) -> PathBuf {
        self.identity_dir(name, version).join(UPDATES_DIR)
    }

    pub fn providers_dir(&self, is_add_on: bool) -> PathBuf {
        self.root
            .join(if is_add_on { ADDONS_DIR } else { LAYERS_DIR })
    }

    pub fn provider_dir(&self, name: &str, is_add_on: bool) -> PathBuf {
        self.providers_dir(is_add_on).join(name)
    }

    /// The provider's patches or updates subtree, by element patch type.
    pub fn provider_tree(&self, name: &str, is_add_on: bool, patch_type: PatchType) -> PathBuf {
        self.provider_dir(name, is_add_on).join(match patch_type {
            PatchType::OneOff => PATCHES_DIR,
            PatchType::Cumulative => UPDATES_DIR,
        })
    }

    pub fn provider_updates_dir(&self, name: &str, is_add_on: bool) -> PathBuf {
        self.provider_dir(name, is_add_on).join(UPDATES_DIR)
    }

    /// Locates the storage directory of an indexed element. The index records
    /// only the provider name and `elementId@version`, so the layer/add-on
    /// and patches/updates distinctions are recovered by probing.
    pub fn find_element_dir(&self, provider: &str, elem: &ElementRef) -> Result<ElementLocation> {
        for is_add_on in [false, true] {
            for patch_type in [PatchType::OneOff, PatchType::Cumulative] {
                let dir = self
                    .provider_tree(provider, is_add_on, patch_type)
                    .join(&elem.provider_version)
                    .join(&elem.element_id);
                if storage::is_dir(&dir)? {
                    return Ok(ElementLocation {
                        dir,
                        is_add_on,
                        cumulative: patch_type == PatchType::Cumulative,
                    });
                }
            }
        }
        Err(RepoError::not_found(format!(
            "element {}@{} of provider {provider} is not in the repository",
            elem.element_id, elem.provider_version
        )))
    }
}
