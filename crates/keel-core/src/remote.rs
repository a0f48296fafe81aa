//! The remote boundary.
//!
//! Transport, authentication, and retry policy live outside the core; this
//! trait only surfaces success/failure, artifact file sets, and manifests.
//! Artifacts cross the boundary as `(relative path, bytes)` pairs so the
//! core can verify them against the transmitted manifest before anything
//! touches the package folder.

use async_trait::async_trait;

use keel_schema::{FileTreeManifest, PackageReference, RecipeReference};

use crate::error::CoreError;

/// A named file inside a transferred artifact tree.
pub type RemoteFile = (String, Vec<u8>);

/// One configured remote.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Stable name of this remote, used in reports and errors.
    fn name(&self) -> &str;

    /// All known references for a package name.
    async fn search(&self, name: &str) -> Result<Vec<RecipeReference>, CoreError>;

    /// Recipe content and its manifest, with the revision pinned.
    async fn get_recipe(
        &self,
        reference: &RecipeReference,
    ) -> Result<(Vec<RemoteFile>, FileTreeManifest), CoreError>;

    /// Manifest of the recipe export folder, if the recipe exists here.
    async fn recipe_manifest(
        &self,
        reference: &RecipeReference,
    ) -> Result<Option<FileTreeManifest>, CoreError>;

    /// Manifest of a binary package, if one exists for this identity.
    async fn package_manifest(
        &self,
        reference: &PackageReference,
    ) -> Result<Option<FileTreeManifest>, CoreError>;

    /// Download a binary package's file tree and its manifest.
    async fn get_package(
        &self,
        reference: &PackageReference,
    ) -> Result<(Vec<RemoteFile>, FileTreeManifest), CoreError>;

    /// Publish a binary package. The core never calls this; it completes
    /// the boundary for upload-capable frontends.
    async fn upload_package(
        &self,
        reference: &PackageReference,
        files: Vec<RemoteFile>,
        manifest: FileTreeManifest,
    ) -> Result<(), CoreError>;
}

/// The ordered set of remotes consulted during resolution.
///
/// Order matters: the first remote that knows a reference wins, matching
/// the cache-before-remote preference one level up.
#[derive(Clone, Default)]
pub struct RemoteSet {
    remotes: Vec<std::sync::Arc<dyn Remote>>,
}

impl std::fmt::Debug for RemoteSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.remotes.iter().map(|r| r.name()).collect();
        f.debug_struct("RemoteSet").field("remotes", &names).finish()
    }
}

impl RemoteSet {
    /// An empty set (cache-only operation).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a remote; consulted after all previously added ones.
    pub fn add(&mut self, remote: std::sync::Arc<dyn Remote>) {
        self.remotes.push(remote);
    }

    /// Iterate remotes in consultation order.
    pub fn iter(&self) -> impl Iterator<Item = &std::sync::Arc<dyn Remote>> {
        self.remotes.iter()
    }

    /// Whether no remotes are configured.
    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    /// First remote that has a binary package for `reference`.
    pub async fn find_package(
        &self,
        reference: &PackageReference,
    ) -> Result<Option<(String, FileTreeManifest)>, CoreError> {
        for remote in &self.remotes {
            if let Some(manifest) = remote.package_manifest(reference).await? {
                return Ok(Some((remote.name().to_string(), manifest)));
            }
        }
        Ok(None)
    }

    /// First remote that has the recipe, with its manifest.
    pub async fn find_recipe(
        &self,
        reference: &RecipeReference,
    ) -> Result<Option<(String, FileTreeManifest)>, CoreError> {
        for remote in &self.remotes {
            if let Some(manifest) = remote.recipe_manifest(reference).await? {
                return Ok(Some((remote.name().to_string(), manifest)));
            }
        }
        Ok(None)
    }

    /// The remote with the given name, if configured.
    pub fn get(&self, name: &str) -> Option<&std::sync::Arc<dyn Remote>> {
        self.remotes.iter().find(|r| r.name() == name)
    }
}
