//! Persisted index records
//!
//! Two small text formats live here: the per-patch elements index
//! (`elements.txt`, `provider=elementId@version` per line) and the
//! per-provider-version allow-list (`allowed-identities.txt`, one
//! `name-version` token per line). Both are parsed strictly; a malformed
//! line is a [`RepoError::Format`], never a silently wrong record.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::{RepoError, Result};
use crate::storage;

/// An `"elementId@providerVersion"` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub element_id: String,
    pub provider_version: String,
}

impl ElementRef {
    pub fn new(element_id: impl Into<String>, provider_version: impl Into<String>) -> Self {
        ElementRef {
            element_id: element_id.into(),
            provider_version: provider_version.into(),
        }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.element_id, self.provider_version)
    }
}

impl FromStr for ElementRef {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self> {
        let (id, version) = s
            .split_once('@')
            .ok_or_else(|| RepoError::format(format!("'{s}' is not an elementId@version reference")))?;
        if id.is_empty() || version.is_empty() || version.contains('@') {
            return Err(RepoError::format(format!(
                "'{s}' is not an elementId@version reference"
            )));
        }
        Ok(ElementRef::new(id, version))
    }
}

/// The elements index of one stored patch: provider name to element
/// reference, in manifest order.
#[derive(Debug, Clone, Default)]
pub struct ElementsIndex {
    entries: IndexMap<String, ElementRef>,
}

impl ElementsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: impl Into<String>, elem: ElementRef) {
        self.entries.insert(provider.into(), elem);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ElementRef)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = storage::read_to_string(path)?;
        let mut index = ElementsIndex::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (provider, elem) = line.split_once('=').ok_or_else(|| {
                RepoError::format(format!("malformed line '{line}' in {}", path.display()))
            })?;
            if provider.is_empty() {
                return Err(RepoError::format(format!(
                    "malformed line '{line}' in {}",
                    path.display()
                )));
            }
            index.insert(provider, elem.parse::<ElementRef>()?);
        }
        Ok(index)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (provider, elem) in &self.entries {
            out.push_str(provider);
            out.push('=');
            out.push_str(&elem.to_string());
            out.push('\n');
        }
        storage::write_file(path, out.as_bytes())
    }
}

/// Loads an allow-list; a missing file is an empty list.
pub fn load_allowed_identities(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = storage::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Appends one identity token to an allow-list. Entries are only ever added.
pub fn append_allowed_identity(path: &Path, identity: &str) -> Result<()> {
    storage::append_line(path, identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn element_ref_round_trips() {
        let elem: ElementRef = "base-cp1@base".parse().unwrap();
        assert_eq!(elem.element_id, "base-cp1");
        assert_eq!(elem.provider_version, "base");
        assert_eq!(elem.to_string(), "base-cp1@base");
    }

    #[test]
    fn malformed_refs_are_rejected() {
        for bad in ["no-separator", "@base", "elem@", "a@b@c"] {
            assert!(
                bad.parse::<ElementRef>().is_err(),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn index_round_trips_in_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("elements.txt");

        let mut index = ElementsIndex::new();
        index.insert("zeta", ElementRef::new("zeta-p1", "base"));
        index.insert("base", ElementRef::new("base-p1", "base-cp1"));
        index.store(&path).unwrap();

        let loaded = ElementsIndex::load(&path).unwrap();
        let providers: Vec<_> = loaded.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(providers, vec!["zeta", "base"]);
        assert_eq!(
            loaded.iter().nth(1).unwrap().1,
            &ElementRef::new("base-p1", "base-cp1")
        );
    }

    #[test]
    fn malformed_index_line_is_a_format_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("elements.txt");
        std::fs::write(&path, "base=base-p1@base\ngarbage line\n").unwrap();
        assert!(matches!(
            ElementsIndex::load(&path).unwrap_err(),
            RepoError::Format { .. }
        ));
    }

    #[test]
    fn missing_allow_list_is_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("allowed-identities.txt");
        assert!(load_allowed_identities(&path).unwrap().is_empty());

        append_allowed_identity(&path, "product-1.0.2").unwrap();
        append_allowed_identity(&path, "product-1.0.1").unwrap();
        assert_eq!(
            load_allowed_identities(&path).unwrap(),
            vec!["product-1.0.2", "product-1.0.1"]
        );
    }
}
