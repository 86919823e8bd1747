//! Core types and codecs for patchvault
//!
//! This crate provides the building blocks the repository engine is made of:
//!
//! - **Patch metadata**: [`Patch`], [`Identity`], [`PatchElement`] and friends
//! - **Manifest codec**: `patch.xml` parsing, serialization and fragment
//!   slicing ([`manifest`])
//! - **Archive capability**: reading and writing `.tar.gz` patch containers
//!   ([`archive`])
//!
//! Versions are opaque tokens throughout. They are compared for equality
//! only; no semantic version ordering is applied anywhere in this crate.

pub mod archive;
pub mod error;
pub mod manifest;
pub mod metadata;

pub use archive::{ArchiveEntry, ArchiveWriter};
pub use error::{CoreError, Result};
pub use manifest::PATCH_XML;
pub use metadata::{
    AddOnInfo, Identity, IdentityKind, Patch, PatchElement, PatchType, Provider, BASE_VERSION,
};
