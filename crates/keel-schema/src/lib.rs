//! Shared value types for keel.
//!
//! Everything that both the graph engine and the cache need to agree on
//! lives here: recipe/package references, the package-identity hash, and
//! file-tree manifests. This crate performs no network or cache I/O; the
//! only filesystem access is scanning a directory to build a manifest.

pub mod hash;
pub mod ident;
pub mod manifest;
pub mod refs;
pub mod version;

pub use hash::Blake3Hash;
pub use ident::{DependencyIdentity, PackageIdentity};
pub use manifest::FileTreeManifest;
pub use refs::{PackageReference, RecipeReference, RefError};
pub use version::Version;
