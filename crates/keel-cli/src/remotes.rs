//! Directory-backed remotes.
//!
//! A remote is any shared directory laid out like the cache reference
//! tree (`refs/<name>/<version>/<user>/<channel>/{export,packages}`),
//! e.g. a mounted network share. Remotes are declared in
//! `$KEEL_HOME/remotes.toml` and consulted in declaration order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use keel_core::{CoreError, Remote, RemoteFile, RemoteSet};
use keel_schema::{FileTreeManifest, PackageReference, RecipeReference};

/// Remote declarations file, relative to the cache root.
pub const REMOTES_FILE: &str = "remotes.toml";

#[derive(Debug, Deserialize)]
struct RemotesFile {
    #[serde(default, rename = "remote")]
    remotes: Vec<RemoteEntry>,
}

#[derive(Debug, Deserialize)]
struct RemoteEntry {
    name: String,
    path: PathBuf,
}

/// Load the configured remotes, empty when no file exists.
pub fn load_remotes(cache_root: &Path) -> Result<RemoteSet, CoreError> {
    let path = cache_root.join(REMOTES_FILE);
    let mut set = RemoteSet::new();
    if !path.exists() {
        return Ok(set);
    }
    let content = fs::read_to_string(&path)?;
    let file: RemotesFile = toml::from_str(&content)
        .map_err(|e| CoreError::Configuration(format!("Malformed remotes file: {e}")))?;
    for entry in file.remotes {
        debug!(name = entry.name, path = %entry.path.display(), "remote configured");
        set.add(Arc::new(DirectoryRemote::new(entry.name, entry.path)));
    }
    Ok(set)
}

/// A remote served from a plain directory tree.
#[derive(Debug)]
pub struct DirectoryRemote {
    name: String,
    root: PathBuf,
}

impl DirectoryRemote {
    /// Create a remote over `root`.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    fn export_dir(&self, reference: &RecipeReference) -> PathBuf {
        self.root
            .join("refs")
            .join(reference.dir_repr())
            .join("export")
    }

    fn package_dir(&self, reference: &PackageReference) -> PathBuf {
        self.root
            .join("refs")
            .join(reference.recipe.dir_repr())
            .join("packages")
            .join(reference.package_id.as_str())
    }

    /// All regular files under `dir`, paths relative with forward slashes.
    /// The manifest travels separately and is excluded.
    fn collect_files(&self, dir: &Path) -> Result<Vec<RemoteFile>, CoreError> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                CoreError::remote(&self.name, format!("cannot read '{}': {e}", dir.display()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|_| {
                    CoreError::remote(&self.name, format!("entry escapes '{}'", dir.display()))
                })?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if rel == keel_schema::manifest::MANIFEST_FILE {
                continue;
            }
            files.push((rel, fs::read(entry.path())?));
        }
        Ok(files)
    }
}

fn manifest_of(dir: &Path) -> Result<Option<FileTreeManifest>, CoreError> {
    if !FileTreeManifest::exists(dir) {
        return Ok(None);
    }
    Ok(Some(FileTreeManifest::load(dir)?))
}

#[async_trait]
impl Remote for DirectoryRemote {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, name: &str) -> Result<Vec<RecipeReference>, CoreError> {
        let name_dir = self.root.join("refs").join(name);
        let mut found = Vec::new();
        if !name_dir.exists() {
            return Ok(found);
        }
        // refs/<name>/<version>/<user>/<channel>
        for version in read_dir_names(&name_dir)? {
            for user in read_dir_names(&name_dir.join(&version))? {
                for channel in read_dir_names(&name_dir.join(&version).join(&user))? {
                    let mut reference = RecipeReference::new(name, &version, &user, &channel);
                    if let Some(manifest) = manifest_of(&self.export_dir(&reference))? {
                        reference = reference.with_revision(manifest.summary());
                        found.push(reference);
                    }
                }
            }
        }
        Ok(found)
    }

    async fn get_recipe(
        &self,
        reference: &RecipeReference,
    ) -> Result<(Vec<RemoteFile>, FileTreeManifest), CoreError> {
        let dir = self.export_dir(reference);
        let manifest = manifest_of(&dir)?.ok_or_else(|| {
            CoreError::remote(&self.name, format!("no recipe for '{reference}'"))
        })?;
        Ok((self.collect_files(&dir)?, manifest))
    }

    async fn recipe_manifest(
        &self,
        reference: &RecipeReference,
    ) -> Result<Option<FileTreeManifest>, CoreError> {
        manifest_of(&self.export_dir(reference))
    }

    async fn package_manifest(
        &self,
        reference: &PackageReference,
    ) -> Result<Option<FileTreeManifest>, CoreError> {
        manifest_of(&self.package_dir(reference))
    }

    async fn get_package(
        &self,
        reference: &PackageReference,
    ) -> Result<(Vec<RemoteFile>, FileTreeManifest), CoreError> {
        let dir = self.package_dir(reference);
        let manifest = manifest_of(&dir)?.ok_or_else(|| {
            CoreError::remote(&self.name, format!("no package for '{reference}'"))
        })?;
        Ok((self.collect_files(&dir)?, manifest))
    }

    async fn upload_package(
        &self,
        reference: &PackageReference,
        files: Vec<RemoteFile>,
        manifest: FileTreeManifest,
    ) -> Result<(), CoreError> {
        let dir = self.package_dir(reference);
        fs::create_dir_all(&dir)?;
        for (rel, bytes) in &files {
            let dest = dir.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(dest, bytes)?;
        }
        manifest.save(&dir)?;
        Ok(())
    }
}

fn read_dir_names(dir: &Path) -> Result<Vec<String>, CoreError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_recipe(root: &Path, reference: &RecipeReference) {
        let dir = root.join("refs").join(reference.dir_repr()).join("export");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("keel.toml"), b"name = \"zlib\"").unwrap();
        let manifest = FileTreeManifest::create(&dir).unwrap();
        manifest.save(&dir).unwrap();
    }

    #[tokio::test]
    async fn search_reports_pinned_references() {
        let tmp = tempdir().unwrap();
        let reference = RecipeReference::new("zlib", "1.2.11", "core", "stable");
        seed_recipe(tmp.path(), &reference);

        let remote = DirectoryRemote::new("share", tmp.path());
        let found = remote.search("zlib").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], reference);
        assert!(found[0].revision.is_some());
    }

    #[tokio::test]
    async fn recipe_files_round_trip_with_manifest() {
        let tmp = tempdir().unwrap();
        let reference = RecipeReference::new("zlib", "1.2.11", "core", "stable");
        seed_recipe(tmp.path(), &reference);

        let remote = DirectoryRemote::new("share", tmp.path());
        let (files, manifest) = remote.get_recipe(&reference).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "keel.toml");
        assert!(manifest.get("keel.toml").is_some());
    }

    #[test]
    fn missing_remotes_file_means_no_remotes() {
        let tmp = tempdir().unwrap();
        let set = load_remotes(tmp.path()).unwrap();
        assert!(set.is_empty());
    }
}
