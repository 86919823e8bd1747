//! Patch metadata types
//!
//! An [`Identity`] names the product (or the target of a query) by name and
//! version. A [`Patch`] targets exactly one identity and carries one
//! [`PatchElement`] per content provider it touches. Providers are either the
//! base distribution, a layer, or an add-on; add-ons are gated per identity
//! by the repository's allow-lists.

use std::fmt;

/// Sentinel version for a provider that no update has been applied to yet.
pub const BASE_VERSION: &str = "base";

/// Whether a patch (or patch element) advances its target to a new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    OneOff,
    Cumulative,
}

impl PatchType {
    /// The token used for this patch type in `patch.xml`.
    pub fn as_manifest_str(&self) -> &'static str {
        match self {
            PatchType::OneOff => "no-upgrade",
            PatchType::Cumulative => "upgrade",
        }
    }

    pub fn from_manifest_str(s: &str) -> Option<Self> {
        match s {
            "no-upgrade" => Some(PatchType::OneOff),
            "upgrade" => Some(PatchType::Cumulative),
            _ => None,
        }
    }
}

/// An add-on carried by an identity, with the add-on's current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOnInfo {
    pub name: String,
    pub version: String,
}

/// One-off identities stay at their version; cumulative ones advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKind {
    OneOff,
    Cumulative { to_version: String },
}

/// The product's name and version, the top-level subject of a patch.
///
/// Also used as the query argument for repository lookups, in which case the
/// kind is [`IdentityKind::OneOff`] and only name, version and add-ons
/// matter. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
    version: String,
    kind: IdentityKind,
    add_ons: Vec<AddOnInfo>,
}

impl Identity {
    /// An identity at a fixed version, without add-ons.
    pub fn base(name: impl Into<String>, version: impl Into<String>) -> Self {
        Identity {
            name: name.into(),
            version: version.into(),
            kind: IdentityKind::OneOff,
            add_ons: Vec::new(),
        }
    }

    /// An identity that a cumulative patch advances to `to_version`.
    pub fn upgrade(
        name: impl Into<String>,
        version: impl Into<String>,
        to_version: impl Into<String>,
    ) -> Self {
        Identity {
            name: name.into(),
            version: version.into(),
            kind: IdentityKind::Cumulative {
                to_version: to_version.into(),
            },
            add_ons: Vec::new(),
        }
    }

    /// Adds an add-on. Add-ons are unique by name; adding an already present
    /// name replaces its version.
    pub fn with_add_on(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        if let Some(existing) = self.add_ons.iter_mut().find(|a| a.name == name) {
            existing.version = version;
        } else {
            self.add_ons.push(AddOnInfo { name, version });
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> &IdentityKind {
        &self.kind
    }

    pub fn patch_type(&self) -> PatchType {
        match self.kind {
            IdentityKind::OneOff => PatchType::OneOff,
            IdentityKind::Cumulative { .. } => PatchType::Cumulative,
        }
    }

    /// The version a cumulative patch advances this identity to.
    pub fn to_version(&self) -> Option<&str> {
        match &self.kind {
            IdentityKind::OneOff => None,
            IdentityKind::Cumulative { to_version } => Some(to_version),
        }
    }

    /// The version this identity ends up at: `to_version` for cumulative
    /// identities, the current version otherwise.
    pub fn resulting_version(&self) -> &str {
        self.to_version().unwrap_or(&self.version)
    }

    pub fn add_ons(&self) -> &[AddOnInfo] {
        &self.add_ons
    }

    pub fn has_add_ons(&self) -> bool {
        !self.add_ons.is_empty()
    }

    /// The `"{name}-{version}"` token used for identity directories and
    /// allow-list entries.
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// The identity after an update hop: same name and add-ons, new version.
    /// Add-on versions are carried over unchanged; they are not re-resolved
    /// across the hop.
    pub fn advanced_to(&self, version: impl Into<String>) -> Self {
        Identity {
            name: self.name.clone(),
            version: version.into(),
            kind: IdentityKind::OneOff,
            add_ons: self.add_ons.clone(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)?;
        if !self.add_ons.is_empty() {
            write!(f, " add-ons=[")?;
            for (i, a) in self.add_ons.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}-{}", a.name, a.version)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// A named content source a patch element targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub name: String,
    pub is_add_on: bool,
    pub patch_type: PatchType,
}

/// The portion of a patch scoped to one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchElement {
    pub id: String,
    pub provider: Provider,
    /// The raw `<element>` manifest block, when this element came from an
    /// ingested manifest or from storage.
    pub fragment: Option<String>,
}

/// A parsed or synthesized patch. Never mutated after construction; every
/// retrieval from the repository builds a fresh value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub id: String,
    pub identity: Identity,
    pub elements: Vec<PatchElement>,
    /// Raw `<misc-files>` manifest fragment, if the patch carries one.
    pub misc_files: Option<String>,
}

impl Patch {
    /// A patch whose elements all target add-ons is stored without an
    /// identity-level record.
    pub fn is_add_on_only(&self) -> bool {
        !self.elements.is_empty() && self.elements.iter().all(|e| e.provider.is_add_on)
    }
}
