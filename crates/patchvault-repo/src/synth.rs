//! Manifest synthesis
//!
//! Stored patches are reassembled from fragments: the identity's elements
//! index names each provider's `elementId@version`, the corresponding
//! provider directories hold the sliced `<element>` blocks, and a fixed
//! template stitches everything back into a `patch.xml` document.

use std::path::PathBuf;

use patchvault_core::{manifest, Identity, Patch, PatchType, BASE_VERSION};

use crate::error::{RepoError, Result};
use crate::index::ElementsIndex;
use crate::layout::{
    RepoLayout, ELEMENTS_FILE, ELEMENT_XML, MISC_FILES_XML, UPDATED_VERSION_FILE,
};
use crate::{resolve, storage};

/// The manifest template. `@name@` tokens are substituted line by line;
/// an unrecognized token is left untouched verbatim.
const TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<patch id="@patch-id@">
    <@patch-type@ name="@identity-name@" version="@identity-version@" @to-version@/>
    <elements>
@elements@
    </elements>
@misc-files@
</patch>
"#;

/// A stored patch reassembled into manifest text, plus everything the
/// materializer needs to collect its file trees.
#[derive(Debug)]
pub struct Synthesized {
    pub manifest: String,
    pub patch: Patch,
    /// The identity-level storage directory of the patch. Add-on one-offs
    /// have none.
    pub stored_dir: Option<PathBuf>,
    /// Per element: id and provider storage directory holding its files.
    pub elements: Vec<SynthElement>,
}

#[derive(Debug)]
pub struct SynthElement {
    pub element_id: String,
    pub dir: PathBuf,
}

/// Reassembles the identity-scoped patch (or update) stored under
/// `patch_id`.
///
/// Update synthesis additionally resolves each of the identity's add-ons and
/// appends the applicable update element fragment; one-off synthesis never
/// merges add-on fragments, add-on one-offs are retrieved independently.
pub fn synthesize_stored(
    layout: &RepoLayout,
    identity: &Identity,
    patch_id: &str,
    is_update: bool,
) -> Result<Synthesized> {
    let tree = if is_update {
        layout.identity_updates_dir(identity.name(), identity.version())
    } else {
        layout.identity_patches_dir(identity.name(), identity.version())
    };
    let stored_dir = tree.join(patch_id);
    if !storage::is_dir(&stored_dir)? {
        return Err(RepoError::not_found(format!(
            "no stored {} '{patch_id}' for {}",
            if is_update { "update" } else { "patch" },
            identity.qualified_name()
        )));
    }

    let index = ElementsIndex::load(&stored_dir.join(ELEMENTS_FILE))?;
    let mut fragments: Vec<String> = Vec::new();
    let mut elements: Vec<SynthElement> = Vec::new();
    for (provider, elem_ref) in index.iter() {
        let location = layout.find_element_dir(provider, elem_ref)?;
        let fragment = storage::read_to_string(&location.dir.join(ELEMENT_XML))?;
        fragments.push(fragment.trim_end().to_string());
        elements.push(SynthElement {
            element_id: elem_ref.element_id.clone(),
            dir: location.dir,
        });
    }

    if is_update && identity.has_add_ons() {
        for add_on in identity.add_ons() {
            let resolved =
                resolve::resolve_provider_version(layout, &add_on.name, true, identity)?;
            if resolved == add_on.version || resolved == BASE_VERSION {
                continue;
            }
            let dir = find_update_element(layout, &add_on.name, &resolved)?;
            let fragment = storage::read_to_string(&dir.join(ELEMENT_XML))?;
            fragments.push(fragment.trim_end().to_string());
            elements.push(SynthElement {
                element_id: resolved,
                dir,
            });
        }
    }

    let to_attr = if is_update {
        let to = storage::read_marker(&stored_dir.join(UPDATED_VERSION_FILE))?;
        Some(format!("to-version=\"{to}\""))
    } else {
        None
    };
    let misc_path = stored_dir.join(MISC_FILES_XML);
    let misc = if misc_path.is_file() {
        Some(storage::read_to_string(&misc_path)?.trim_end().to_string())
    } else {
        None
    };

    let elements_text = fragments.join("\n");
    let vars: [(&str, Option<&str>); 7] = [
        ("patch-id", Some(patch_id)),
        (
            "patch-type",
            Some(if is_update { "upgrade" } else { "no-upgrade" }),
        ),
        ("to-version", to_attr.as_deref()),
        ("identity-name", Some(identity.name())),
        ("identity-version", Some(identity.version())),
        ("elements", Some(&elements_text)),
        ("misc-files", misc.as_deref()),
    ];
    let manifest_text = render_template(TEMPLATE, &vars);
    let patch = manifest::parse(&manifest_text)?;

    Ok(Synthesized {
        manifest: manifest_text,
        patch,
        stored_dir: Some(stored_dir),
        elements,
    })
}

/// Reassembles a one-off add-on patch. The patch id doubles as the element
/// id; the manifest is rebuilt around that single stored fragment, targeting
/// the queried identity.
pub fn synthesize_add_on_patch(
    layout: &RepoLayout,
    identity: &Identity,
    patch_id: &str,
) -> Result<Synthesized> {
    let dir = locate_add_on_patch(layout, identity, patch_id)?;
    let fragment = storage::read_to_string(&dir.join(ELEMENT_XML))?
        .trim_end()
        .to_string();
    let vars: [(&str, Option<&str>); 7] = [
        ("patch-id", Some(patch_id)),
        ("patch-type", Some("no-upgrade")),
        ("to-version", None),
        ("identity-name", Some(identity.name())),
        ("identity-version", Some(identity.version())),
        ("elements", Some(&fragment)),
        ("misc-files", None),
    ];
    let manifest_text = render_template(TEMPLATE, &vars);
    let patch = manifest::parse(&manifest_text)?;
    Ok(Synthesized {
        manifest: manifest_text,
        patch,
        stored_dir: None,
        elements: vec![SynthElement {
            element_id: patch_id.to_string(),
            dir,
        }],
    })
}

/// An identity with add-ons looks the patch up at its recorded add-on
/// versions; one without scans every stored add-on version.
fn locate_add_on_patch(
    layout: &RepoLayout,
    identity: &Identity,
    patch_id: &str,
) -> Result<PathBuf> {
    if identity.has_add_ons() {
        for add_on in identity.add_ons() {
            let dir = layout
                .provider_tree(&add_on.name, true, PatchType::OneOff)
                .join(&add_on.version)
                .join(patch_id);
            if storage::is_dir(&dir)? {
                return Ok(dir);
            }
        }
    } else {
        for (name, _) in storage::subdirs(&layout.providers_dir(true))? {
            let patches = layout.provider_tree(&name, true, PatchType::OneOff);
            for (_, version_dir) in storage::subdirs(&patches)? {
                let dir = version_dir.join(patch_id);
                if storage::is_dir(&dir)? {
                    return Ok(dir);
                }
            }
        }
    }
    Err(RepoError::not_found(format!(
        "no add-on patch '{patch_id}' applicable to {}",
        identity.qualified_name()
    )))
}

/// Locates the element directory of a provider update by its element id,
/// whatever version directory it was recorded under.
fn find_update_element(layout: &RepoLayout, provider: &str, element_id: &str) -> Result<PathBuf> {
    for (_, version_dir) in storage::subdirs(&layout.provider_updates_dir(provider, true))? {
        let dir = version_dir.join(element_id);
        if storage::is_dir(&dir)? {
            return Ok(dir);
        }
    }
    Err(RepoError::not_found(format!(
        "update element '{element_id}' of add-on {provider} is not in the repository"
    )))
}

/// Substitutes `@name@` tokens into the template, scanning each line left to
/// right. A recognized token with no value substitutes to nothing; an
/// unrecognized token stays verbatim. Substituted values are never rescanned.
fn render_template(template: &str, vars: &[(&str, Option<&str>)]) -> String {
    let mut out = String::with_capacity(template.len());
    for line in template.lines() {
        let mut rest = line;
        loop {
            let Some(at) = rest.find('@') else {
                out.push_str(rest);
                break;
            };
            out.push_str(&rest[..at]);
            let after = &rest[at + 1..];
            match after.find('@') {
                None => {
                    out.push_str(&rest[at..]);
                    break;
                }
                Some(close) => {
                    let token = &after[..close];
                    if let Some((_, value)) = vars.iter().find(|(name, _)| *name == token) {
                        if let Some(value) = value {
                            out.push_str(value);
                        }
                        rest = &after[close + 1..];
                    } else {
                        out.push('@');
                        rest = after;
                    }
                }
            }
        }
        out.push('\n');
    }
    out
}
