//! Filesystem-backed patch repository
//!
//! Patches for a modular product arrive as `.tar.gz` archives carrying a
//! `patch.xml` manifest. The repository tears them apart for storage, one
//! element per content provider (a layer or an add-on), and re-synthesizes
//! them on retrieval: one-off patches one at a time, cumulative updates as
//! bundles built by walking the version chain. Add-on updates are gated per
//! identity by allow-lists.
//!
//! [`PatchRepository`] is the entry point; everything else backs it.

pub mod bundle;
pub mod chain;
pub mod error;
pub mod index;
pub mod ingest;
pub mod layout;
pub mod repository;
pub mod resolve;
pub mod storage;
pub mod synth;

pub use bundle::{BundleBuilder, BundleEntry, BundleIndex, BUNDLE_XML};
pub use error::{RepoError, Result};
pub use layout::RepoLayout;
pub use repository::PatchRepository;
