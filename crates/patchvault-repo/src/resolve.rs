//! Provider version resolution
//!
//! A provider's update history lives under `updates/<version>/`: each version
//! directory holds the single element that advances the provider past that
//! version (the element id doubles as the resulting version token) plus the
//! allow-list of identities permitted to consume it.

use patchvault_core::{Identity, BASE_VERSION};

use crate::error::{RepoError, Result};
use crate::index;
use crate::layout::{RepoLayout, ALLOWED_IDENTITIES_FILE};
use crate::storage;

/// Determines which stored version of a provider's content applies to the
/// given identity.
///
/// Every recorded update version is inspected: its single successor id
/// becomes a candidate when the version's allow-list names the identity.
/// With no history and with no qualifying candidate the BASE sentinel is
/// returned; the latter silently assumes the provider's base content applies
/// to any identity that never accepted a newer version. With several
/// qualifying candidates the lexicographically greatest id wins. Both rules
/// are long-standing behavior that callers depend on; they are pinned by
/// tests and must not be traded for a semantic version comparison without a
/// product decision.
pub fn resolve_provider_version(
    layout: &RepoLayout,
    provider: &str,
    is_add_on: bool,
    identity: &Identity,
) -> Result<String> {
    let updates_dir = layout.provider_updates_dir(provider, is_add_on);
    let version_dirs = storage::subdirs(&updates_dir)?;
    if version_dirs.is_empty() {
        return Ok(BASE_VERSION.to_string());
    }

    let consumer = identity.qualified_name();
    let mut candidates: Vec<String> = Vec::new();
    for (version, dir) in version_dirs {
        let Some(successor) = sole_successor(provider, &version, &dir)? else {
            continue;
        };
        let allowed = index::load_allowed_identities(&dir.join(ALLOWED_IDENTITIES_FILE))?;
        if allowed.iter().any(|a| a == &consumer) {
            candidates.push(successor);
        }
    }

    match candidates.into_iter().max() {
        Some(best) => Ok(best),
        None => {
            tracing::debug!(provider, identity = %consumer, "no accepted update, assuming base content");
            Ok(BASE_VERSION.to_string())
        }
    }
}

/// The update applicable to a provider at a specific version, gated by the
/// allow-list: `Some(successor element id)` when the identity may consume
/// it, `None` when there is no pending update or the identity was never
/// accepted for it.
pub fn provider_update_for(
    layout: &RepoLayout,
    provider: &str,
    is_add_on: bool,
    provider_version: &str,
    identity: &Identity,
) -> Result<Option<String>> {
    let dir = layout
        .provider_updates_dir(provider, is_add_on)
        .join(provider_version);
    let Some(successor) = sole_successor(provider, provider_version, &dir)? else {
        return Ok(None);
    };
    let allowed = index::load_allowed_identities(&dir.join(ALLOWED_IDENTITIES_FILE))?;
    if allowed.iter().any(|a| a == &identity.qualified_name()) {
        Ok(Some(successor))
    } else {
        Ok(None)
    }
}

/// At most one pending update may exist per provider version; more than one
/// on disk is a corrupt repository, never silently resolved.
fn sole_successor(provider: &str, version: &str, dir: &std::path::Path) -> Result<Option<String>> {
    let successors = storage::subdirs(dir)?;
    match successors.len() {
        0 => Ok(None),
        1 => Ok(successors.into_iter().next().map(|(name, _)| name)),
        n => Err(RepoError::storage(format!(
            "{n} pending updates found for provider {provider} version {version}, expected at most one"
        ))),
    }
}
