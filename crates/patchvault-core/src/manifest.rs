//! The `patch.xml` manifest codec
//!
//! Every patch archive carries a `patch.xml` entry at its root describing the
//! patch id, the target identity and one `<element>` block per provider:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <patch id="cp1">
//!     <upgrade name="product" version="1.0.1" to-version="1.0.2"/>
//!     <elements>
//!         <element id="base-cp1" patch-type="upgrade">
//!             <provider name="base"/>
//!         </element>
//!     </elements>
//! </patch>
//! ```
//!
//! One-off patches use `<no-upgrade name=".." version=".."/>` instead of
//! `<upgrade>`, add-on providers carry `add-on="true"`, and an optional
//! `<misc-files>` block holds an opaque fragment that is stored and re-emitted
//! verbatim.
//!
//! The dialect is deliberately restricted to what the repository itself
//! produces, so the codec is a strict single-pass tag scanner rather than a
//! general XML parser. The repository never works on a manifest tree: element
//! blocks are sliced out of the raw text on ingestion and spliced back
//! together on synthesis.

use crate::error::{CoreError, Result};
use crate::metadata::{Identity, Patch, PatchElement, PatchType, Provider};

/// Name of the manifest entry at the root of every patch archive.
pub const PATCH_XML: &str = "patch.xml";

/// Parses a manifest document into a [`Patch`].
///
/// Each element keeps its raw `<element>` block as its fragment, so the
/// caller can persist the exact ingested text.
pub fn parse(text: &str) -> Result<Patch> {
    let mut pos = 0;
    let mut patch_id: Option<String> = None;
    let mut identity: Option<Identity> = None;
    let mut elements: Vec<PatchElement> = Vec::new();

    while let Some((tag, after)) = next_tag(text, pos)? {
        pos = after;
        match tag.name {
            "patch" => {
                patch_id = Some(tag.require_attr("id")?.to_string());
            }
            "upgrade" | "no-upgrade" if identity.is_none() => {
                let name = tag.require_attr("name")?;
                let version = tag.require_attr("version")?;
                identity = Some(if tag.name == "upgrade" {
                    Identity::upgrade(name, version, tag.require_attr("to-version")?)
                } else {
                    Identity::base(name, version)
                });
            }
            "element" => {
                let id = tag.require_attr("id")?.to_string();
                let patch_type = tag.require_attr("patch-type").and_then(|s| {
                    PatchType::from_manifest_str(s)
                        .ok_or_else(|| CoreError::manifest(format!("unknown patch-type '{s}'")))
                })?;

                let (provider_tag, after_provider) = next_tag(text, pos)?.ok_or_else(|| {
                    CoreError::manifest(format!("element '{id}' has no provider"))
                })?;
                if provider_tag.name != "provider" {
                    return Err(CoreError::manifest(format!(
                        "element '{id}' has no provider, found <{}>",
                        provider_tag.name
                    )));
                }
                pos = after_provider;

                let provider = Provider {
                    name: provider_tag.require_attr("name")?.to_string(),
                    is_add_on: provider_tag.attr("add-on") == Some("true"),
                    patch_type,
                };
                let fragment = element_fragment(text, &id)?;
                elements.push(PatchElement {
                    id,
                    provider,
                    fragment: Some(fragment),
                });
            }
            "misc-files" if !tag.self_closing => {
                // Opaque content, skip it rather than scanning it for tags.
                match text[pos..].find("</misc-files>") {
                    Some(i) => pos += i + "</misc-files>".len(),
                    None => return Err(CoreError::manifest("unterminated <misc-files> block")),
                }
            }
            _ => {}
        }
    }

    let id = patch_id.ok_or_else(|| CoreError::manifest("missing <patch id=..> tag"))?;
    let identity =
        identity.ok_or_else(|| CoreError::manifest("missing <upgrade> or <no-upgrade> tag"))?;

    Ok(Patch {
        id,
        identity,
        elements,
        misc_files: misc_files_fragment(text),
    })
}

/// Serializes a [`Patch`] back into manifest text. Elements that carry a raw
/// fragment are emitted verbatim; the rest are rendered from their fields.
pub fn serialize(patch: &Patch) -> String {
    let mut out = String::with_capacity(512);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!("<patch id=\"{}\">\n", patch.id));

    let identity = &patch.identity;
    match identity.to_version() {
        Some(to) => out.push_str(&format!(
            "    <upgrade name=\"{}\" version=\"{}\" to-version=\"{}\"/>\n",
            identity.name(),
            identity.version(),
            to
        )),
        None => out.push_str(&format!(
            "    <no-upgrade name=\"{}\" version=\"{}\"/>\n",
            identity.name(),
            identity.version()
        )),
    }

    out.push_str("    <elements>\n");
    for element in &patch.elements {
        match &element.fragment {
            Some(fragment) => {
                out.push_str(fragment);
                out.push('\n');
            }
            None => out.push_str(&render_element(element)),
        }
    }
    out.push_str("    </elements>\n");

    if let Some(misc) = &patch.misc_files {
        out.push_str(misc);
        out.push('\n');
    }
    out.push_str("</patch>\n");
    out
}

/// Parses a single stored `<element>` block back into a [`PatchElement`].
pub fn parse_element(text: &str) -> Result<PatchElement> {
    let (tag, after) =
        next_tag(text, 0)?.ok_or_else(|| CoreError::manifest("no <element> tag in fragment"))?;
    if tag.name != "element" {
        return Err(CoreError::manifest(format!(
            "expected an <element> fragment, found <{}>",
            tag.name
        )));
    }
    let id = tag.require_attr("id")?.to_string();
    let patch_type = tag.require_attr("patch-type").and_then(|s| {
        PatchType::from_manifest_str(s)
            .ok_or_else(|| CoreError::manifest(format!("unknown patch-type '{s}'")))
    })?;
    let (provider_tag, _) = next_tag(text, after)?
        .ok_or_else(|| CoreError::manifest(format!("element '{id}' has no provider")))?;
    if provider_tag.name != "provider" {
        return Err(CoreError::manifest(format!(
            "element '{id}' has no provider, found <{}>",
            provider_tag.name
        )));
    }
    Ok(PatchElement {
        id,
        provider: Provider {
            name: provider_tag.require_attr("name")?.to_string(),
            is_add_on: provider_tag.attr("add-on") == Some("true"),
            patch_type,
        },
        fragment: Some(text.trim_end().to_string()),
    })
}

/// Renders a structured element as an `<element>` block.
pub fn render_element(element: &PatchElement) -> String {
    let add_on = if element.provider.is_add_on {
        " add-on=\"true\""
    } else {
        ""
    };
    format!(
        "        <element id=\"{}\" patch-type=\"{}\">\n            <provider name=\"{}\"{}/>\n        </element>\n",
        element.id,
        element.provider.patch_type.as_manifest_str(),
        element.provider.name,
        add_on,
    )
}

/// Slices the single `<element>` block for `element_id` out of raw manifest
/// text: the id is located first, then its enclosing tags.
pub fn element_fragment(text: &str, element_id: &str) -> Result<String> {
    let needle = format!("id=\"{element_id}\"");
    let mut search_from = 0;
    while let Some(found) = text[search_from..].find(&needle) {
        let at = search_from + found;
        let before = &text[..at];
        // The id must sit inside an <element> tag, not e.g. the patch tag.
        if let Some(open) = before.rfind("<element") {
            let closed = matches!(before.rfind("</element>"), Some(c) if c > open);
            if !closed {
                let close = text[at..]
                    .find("</element>")
                    .map(|i| at + i + "</element>".len())
                    .ok_or_else(|| {
                        CoreError::manifest(format!("unterminated element block '{element_id}'"))
                    })?;
                return Ok(text[open..close].to_string());
            }
        }
        search_from = at + needle.len();
    }
    Err(CoreError::manifest(format!(
        "element '{element_id}' not found in manifest"
    )))
}

/// Slices the raw `<misc-files>` block out of manifest text, if present.
pub fn misc_files_fragment(text: &str) -> Option<String> {
    let start = text.find("<misc-files")?;
    let gt = text[start..].find('>')? + start;
    if text[..gt].ends_with('/') {
        return Some(text[start..=gt].to_string());
    }
    let end = text[gt..].find("</misc-files>")? + gt + "</misc-files>".len();
    Some(text[start..end].to_string())
}

struct Tag<'a> {
    name: &'a str,
    attrs: Vec<(&'a str, &'a str)>,
    self_closing: bool,
}

impl<'a> Tag<'a> {
    fn attr(&self, name: &str) -> Option<&'a str> {
        self.attrs.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    fn require_attr(&self, name: &str) -> Result<&'a str> {
        self.attr(name).ok_or_else(|| {
            CoreError::manifest(format!("<{}> is missing the '{name}' attribute", self.name))
        })
    }
}

/// Returns the next opening tag at or after `pos` and the position just past
/// it. Closing tags, the XML declaration and comments are skipped.
fn next_tag(text: &str, mut pos: usize) -> Result<Option<(Tag<'_>, usize)>> {
    let bytes = text.as_bytes();
    loop {
        let lt = match text[pos..].find('<') {
            Some(i) => pos + i,
            None => return Ok(None),
        };
        let rest = &text[lt + 1..];
        if rest.starts_with('/') || rest.starts_with('?') || rest.starts_with('!') {
            pos = match text[lt..].find('>') {
                Some(i) => lt + i + 1,
                None => return Err(CoreError::manifest("unterminated tag")),
            };
            continue;
        }

        let mut i = lt + 1;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
            i += 1;
        }
        if i == lt + 1 {
            return Err(CoreError::manifest(format!(
                "malformed tag at offset {lt}"
            )));
        }
        let name = &text[lt + 1..i];

        let mut attrs = Vec::new();
        let mut self_closing = false;
        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(CoreError::manifest(format!("unterminated <{name}> tag")));
            }
            if bytes[i] == b'>' {
                i += 1;
                break;
            }
            if bytes[i] == b'/' {
                if i + 1 < bytes.len() && bytes[i + 1] == b'>' {
                    self_closing = true;
                    i += 2;
                    break;
                }
                return Err(CoreError::manifest(format!("malformed <{name}> tag")));
            }

            let attr_start = i;
            while i < bytes.len() && bytes[i] != b'=' && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() || bytes[i] != b'=' {
                return Err(CoreError::manifest(format!(
                    "malformed attribute in <{name}> tag"
                )));
            }
            let attr_name = &text[attr_start..i];
            i += 1;
            if i >= bytes.len() || bytes[i] != b'"' {
                return Err(CoreError::manifest(format!(
                    "attribute '{attr_name}' in <{name}> is not quoted"
                )));
            }
            i += 1;
            let value_start = i;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(CoreError::manifest(format!(
                    "unterminated attribute value in <{name}> tag"
                )));
            }
            attrs.push((attr_name, &text[value_start..i]));
            i += 1;
        }

        return Ok(Some((
            Tag {
                name,
                attrs,
                self_closing,
            },
            i,
        )));
    }
}
