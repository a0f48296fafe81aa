//! Cache layout and manifest store.
//!
//! One on-disk store per invocation, passed as an explicit handle to every
//! component that needs it (no process-wide singletons). The cache is
//! shared between processes: mutation of a reference's folders happens
//! under a per-reference exclusive file lock, and folders become visible
//! only through atomic renames, so a concurrent reader never observes a
//! partially written package.
//!
//! Layout, per recipe reference:
//!
//! ```text
//! <root>/refs/<name>/<version>/<user>/<channel>/
//!     export/              recipe source + recipe manifest
//!     metadata.json        recipe revision + package_id -> PREV map
//!     packages/<pkg_id>/   artifact tree + package manifest
//!     .lock                advisory lock guarding all of the above
//! <root>/tmp/              staging area, same volume as the store
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_schema::{Blake3Hash, FileTreeManifest, PackageReference, RecipeReference, Version};

use crate::error::CoreError;

/// Package identities whose folders use a shortened name. Set when the
/// recipe declares `short_paths` for platforms with path-length limits.
const SHORT_PATH_LEN: usize = 8;

/// Per-reference metadata record: the current recipe revision and the
/// known binary packages with their package revisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefMetadata {
    /// Revision of the currently exported recipe content.
    pub recipe_revision: Option<Blake3Hash>,
    /// Known package identities mapped to their finalized PREVs.
    #[serde(default)]
    pub packages: BTreeMap<String, PackageRecord>,
}

/// Metadata for one binary package of a reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Package revision derived from the artifact tree's summary hash.
    pub prev: Blake3Hash,
    /// Recipe revision the package was produced from.
    pub recipe_revision: Option<Blake3Hash>,
}

/// Join a transferred relative path onto `root`, rejecting anything that
/// could land outside it. Remote payloads are untrusted; an absolute path
/// or a `..` component must never reach the filesystem.
pub(crate) fn checked_join(root: &Path, rel: &str) -> Result<PathBuf, CoreError> {
    let mut joined = root.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            std::path::Component::Normal(part) => joined.push(part),
            _ => {
                return Err(CoreError::Configuration(format!(
                    "Unsafe path '{rel}' in transferred file set"
                )))
            }
        }
    }
    Ok(joined)
}

/// RAII guard for a reference's exclusive lock. Dropping releases it.
#[derive(Debug)]
pub struct RefLock {
    file: File,
}

impl Drop for RefLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// Handle to the on-disk cache.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("refs"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    /// Default cache location: `$KEEL_HOME` or `~/.keel`.
    pub fn default_home() -> Result<Self, CoreError> {
        let root = std::env::var_os("KEEL_HOME").map_or_else(
            || {
                dirs::home_dir()
                    .map(|h| h.join(".keel"))
                    .ok_or_else(|| {
                        CoreError::Configuration(
                            "Could not determine home directory. Set KEEL_HOME to override."
                                .to_string(),
                        )
                    })
            },
            |v| Ok(PathBuf::from(v)),
        )?;
        Self::new(root)
    }

    /// Root directory of this cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ref_dir(&self, reference: &RecipeReference) -> PathBuf {
        self.root.join("refs").join(reference.dir_repr())
    }

    /// Export folder of a reference (recipe source + recipe manifest).
    pub fn export(&self, reference: &RecipeReference) -> PathBuf {
        self.ref_dir(reference).join("export")
    }

    /// Package folder for one binary package.
    ///
    /// Honors the recipe's short-paths request by truncating the
    /// package_id component.
    pub fn package(&self, reference: &PackageReference, short_paths: bool) -> PathBuf {
        let id = reference.package_id.as_str();
        let dir_name = if short_paths {
            &id[..SHORT_PATH_LEN.min(id.len())]
        } else {
            id
        };
        self.ref_dir(&reference.recipe).join("packages").join(dir_name)
    }

    /// Take the exclusive lock for a reference, blocking until acquired.
    ///
    /// Lock files are keyed per reference, so unrelated references never
    /// contend.
    pub fn lock(&self, reference: &RecipeReference) -> Result<RefLock, CoreError> {
        let dir = self.ref_dir(reference);
        fs::create_dir_all(&dir)?;
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(dir.join(".lock"))?;
        file.lock_exclusive()?;
        Ok(RefLock { file })
    }

    /// Read the metadata record for a reference, defaulting to empty.
    pub fn metadata(&self, reference: &RecipeReference) -> Result<RefMetadata, CoreError> {
        let path = self.ref_dir(reference).join("metadata.json");
        if !path.exists() {
            return Ok(RefMetadata::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Configuration(format!("Corrupt metadata record: {e}")))
    }

    /// Read-modify-write the metadata record under the reference lock.
    ///
    /// The updated record is published with an atomic rename.
    pub fn update_metadata(
        &self,
        reference: &RecipeReference,
        f: impl FnOnce(&mut RefMetadata),
    ) -> Result<RefMetadata, CoreError> {
        let _lock = self.lock(reference)?;
        let mut metadata = self.metadata(reference)?;
        f(&mut metadata);
        let dir = self.ref_dir(reference);
        let tmp = dir.join("metadata.json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&metadata).map_err(
            |e| CoreError::Configuration(format!("Metadata serialization failed: {e}")),
        )?)?;
        fs::rename(tmp, dir.join("metadata.json"))?;
        Ok(metadata)
    }

    /// Write recipe content into the export folder and derive its
    /// revision from the resulting manifest.
    ///
    /// Overwrites any previous export of the same reference; the new
    /// folder is staged and swapped in atomically under the lock.
    pub fn export_recipe(
        &self,
        reference: &RecipeReference,
        files: &[(String, Vec<u8>)],
    ) -> Result<Blake3Hash, CoreError> {
        let _lock = self.lock(reference)?;
        let staged = self.stage_dir()?;
        for (rel, bytes) in files {
            let path = checked_join(staged.path(), rel)?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, bytes)?;
        }
        let manifest = FileTreeManifest::create(staged.path())?;
        manifest.save(staged.path())?;
        let revision = manifest.summary();

        let export = self.export(reference);
        if export.exists() {
            fs::remove_dir_all(&export)?;
        }
        if let Some(parent) = export.parent() {
            fs::create_dir_all(parent)?;
        }
        let staged_path = staged.keep();
        fs::rename(&staged_path, &export)?;

        // Under the same lock, so readers see revision and export together.
        let mut metadata = self.metadata(reference)?;
        metadata.recipe_revision = Some(revision.clone());
        let dir = self.ref_dir(reference);
        let tmp = dir.join("metadata.json.tmp");
        fs::write(
            &tmp,
            serde_json::to_string_pretty(&metadata)
                .map_err(|e| CoreError::Configuration(format!("Metadata serialization failed: {e}")))?,
        )?;
        fs::rename(tmp, dir.join("metadata.json"))?;

        debug!(reference = %reference, revision = %revision.short(), "recipe exported");
        Ok(revision)
    }

    /// Manifest of the exported recipe, if one exists.
    pub fn recipe_manifest(
        &self,
        reference: &RecipeReference,
    ) -> Result<Option<FileTreeManifest>, CoreError> {
        let export = self.export(reference);
        if !FileTreeManifest::exists(&export) {
            return Ok(None);
        }
        Ok(Some(FileTreeManifest::load(&export)?))
    }

    /// Whether the recipe for a reference is cache-resident.
    pub fn has_recipe(&self, reference: &RecipeReference) -> bool {
        FileTreeManifest::exists(&self.export(reference))
    }

    /// Manifest of a binary package, if its folder exists.
    pub fn package_manifest(
        &self,
        reference: &PackageReference,
        short_paths: bool,
    ) -> Result<Option<FileTreeManifest>, CoreError> {
        let dir = self.package(reference, short_paths);
        if !FileTreeManifest::exists(&dir) {
            return Ok(None);
        }
        Ok(Some(FileTreeManifest::load(&dir)?))
    }

    /// Whether a valid package folder exists for this identity.
    pub fn has_package(&self, reference: &PackageReference, short_paths: bool) -> bool {
        FileTreeManifest::exists(&self.package(reference, short_paths))
    }

    /// All cache-resident references with the given name.
    pub fn cached_versions(&self, name: &str) -> Result<Vec<RecipeReference>, CoreError> {
        let name_dir = self.root.join("refs").join(name);
        let mut found = Vec::new();
        if !name_dir.exists() {
            return Ok(found);
        }
        // refs/<name>/<version>/<user>/<channel>
        for version_entry in fs::read_dir(&name_dir)? {
            let version_entry = version_entry?;
            if !version_entry.file_type()?.is_dir() {
                continue;
            }
            let version = version_entry.file_name().to_string_lossy().to_string();
            for user_entry in fs::read_dir(version_entry.path())? {
                let user_entry = user_entry?;
                if !user_entry.file_type()?.is_dir() {
                    continue;
                }
                let user = user_entry.file_name().to_string_lossy().to_string();
                for channel_entry in fs::read_dir(user_entry.path())? {
                    let channel_entry = channel_entry?;
                    if !channel_entry.file_type()?.is_dir() {
                        continue;
                    }
                    let channel = channel_entry.file_name().to_string_lossy().to_string();
                    let mut reference = RecipeReference {
                        name: name.to_string(),
                        version: Version::new(&version),
                        user: user.clone(),
                        channel,
                        revision: None,
                    };
                    if self.has_recipe(&reference) {
                        reference.revision = self.metadata(&reference)?.recipe_revision;
                        found.push(reference);
                    }
                }
            }
        }
        Ok(found)
    }

    /// A fresh staging directory on the same volume as the store, so the
    /// final publication rename is atomic.
    pub fn stage_dir(&self) -> Result<tempfile::TempDir, CoreError> {
        Ok(tempfile::TempDir::new_in(self.root.join("tmp"))?)
    }

    /// Atomically publish a staged artifact tree as the package folder.
    ///
    /// Fails with [`CoreError::AlreadyExists`] when a folder is already
    /// present and `overwrite` is not set; with it, the old folder is
    /// removed first.
    pub fn publish_package(
        &self,
        reference: &PackageReference,
        short_paths: bool,
        staged: tempfile::TempDir,
        overwrite: bool,
    ) -> Result<(), CoreError> {
        let _lock = self.lock(&reference.recipe)?;
        let dest = self.package(reference, short_paths);
        if dest.exists() {
            if !overwrite {
                return Err(CoreError::AlreadyExists(reference.to_string()));
            }
            fs::remove_dir_all(&dest)?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let staged_path = staged.keep();
        fs::rename(&staged_path, &dest)?;
        debug!(reference = %reference, "package folder published");
        Ok(())
    }

    /// Remove a package folder, ignoring a missing one.
    pub fn remove_package(
        &self,
        reference: &PackageReference,
        short_paths: bool,
    ) -> Result<(), CoreError> {
        let _lock = self.lock(&reference.recipe)?;
        let dir = self.package(reference, short_paths);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache() -> (tempfile::TempDir, CacheLayout) {
        let dir = tempdir().unwrap();
        let cache = CacheLayout::new(dir.path().join("cache")).unwrap();
        (dir, cache)
    }

    fn zlib() -> RecipeReference {
        RecipeReference::new("zlib", "1.2.11", "core", "stable")
    }

    #[test]
    fn export_derives_stable_revision() {
        let (_tmp, cache) = cache();
        let files = vec![("recipe.toml".to_string(), b"name = 'zlib'".to_vec())];

        let rev1 = cache.export_recipe(&zlib(), &files).unwrap();
        let rev2 = cache.export_recipe(&zlib(), &files).unwrap();
        assert_eq!(rev1, rev2);

        let modified = vec![("recipe.toml".to_string(), b"name = 'zlib2'".to_vec())];
        let rev3 = cache.export_recipe(&zlib(), &modified).unwrap();
        assert_ne!(rev1, rev3);
    }

    #[test]
    fn export_records_revision_in_metadata() {
        let (_tmp, cache) = cache();
        let rev = cache
            .export_recipe(&zlib(), &[("r".to_string(), b"x".to_vec())])
            .unwrap();
        let metadata = cache.metadata(&zlib()).unwrap();
        assert_eq!(metadata.recipe_revision, Some(rev));
    }

    #[test]
    fn cached_versions_lists_exported_refs() {
        let (_tmp, cache) = cache();
        let files = vec![("r".to_string(), b"x".to_vec())];
        cache.export_recipe(&zlib(), &files).unwrap();
        cache
            .export_recipe(&RecipeReference::new("zlib", "1.3.0", "core", "stable"), &files)
            .unwrap();

        let mut versions: Vec<String> = cache
            .cached_versions("zlib")
            .unwrap()
            .iter()
            .map(|r| r.version.to_string())
            .collect();
        versions.sort();
        assert_eq!(versions, vec!["1.2.11", "1.3.0"]);
        assert!(cache.cached_versions("nothere").unwrap().is_empty());
    }

    #[test]
    fn cached_versions_spans_channels_under_one_user() {
        let (_tmp, cache) = cache();
        let files = vec![("r".to_string(), b"x".to_vec())];
        cache.export_recipe(&zlib(), &files).unwrap();
        cache
            .export_recipe(
                &RecipeReference::new("zlib", "1.2.11", "core", "testing"),
                &files,
            )
            .unwrap();

        let mut channels: Vec<String> = cache
            .cached_versions("zlib")
            .unwrap()
            .iter()
            .map(|r| r.channel.clone())
            .collect();
        channels.sort();
        assert_eq!(channels, vec!["stable", "testing"]);
    }

    #[test]
    fn traversing_paths_are_rejected() {
        let root = Path::new("/store/tmp/stage");
        assert!(checked_join(root, "lib/libz.a").is_ok());
        for rel in ["../escape.txt", "a/../../escape.txt", "/etc/passwd"] {
            let err = checked_join(root, rel).unwrap_err();
            assert!(matches!(err, CoreError::Configuration(_)));
        }
    }

    #[test]
    fn export_refuses_traversing_recipe_files() {
        let (tmp, cache) = cache();
        let files = vec![("../../escape.txt".to_string(), b"owned".to_vec())];
        assert!(cache.export_recipe(&zlib(), &files).is_err());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn publish_refuses_overwrite_without_force() {
        let (_tmp, cache) = cache();
        let pref = PackageReference::new(zlib(), Blake3Hash::compute(b"id"));

        let staged = cache.stage_dir().unwrap();
        std::fs::write(staged.path().join("lib.a"), b"bits").unwrap();
        cache.publish_package(&pref, false, staged, false).unwrap();
        assert!(cache.package(&pref, false).join("lib.a").exists());

        let staged = cache.stage_dir().unwrap();
        std::fs::write(staged.path().join("lib.a"), b"other").unwrap();
        let err = cache.publish_package(&pref, false, staged, false).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists(_)));

        let staged = cache.stage_dir().unwrap();
        std::fs::write(staged.path().join("lib.a"), b"other").unwrap();
        cache.publish_package(&pref, false, staged, true).unwrap();
        assert_eq!(
            std::fs::read(cache.package(&pref, false).join("lib.a")).unwrap(),
            b"other"
        );
    }

    #[test]
    fn metadata_rmw_preserves_other_entries() {
        let (_tmp, cache) = cache();
        let reference = zlib();
        cache
            .update_metadata(&reference, |m| {
                m.packages.insert(
                    "pkg-a".to_string(),
                    PackageRecord {
                        prev: Blake3Hash::compute(b"a"),
                        recipe_revision: None,
                    },
                );
            })
            .unwrap();
        let metadata = cache
            .update_metadata(&reference, |m| {
                m.packages.insert(
                    "pkg-b".to_string(),
                    PackageRecord {
                        prev: Blake3Hash::compute(b"b"),
                        recipe_revision: None,
                    },
                );
            })
            .unwrap();
        assert_eq!(metadata.packages.len(), 2);
        assert!(metadata.packages.contains_key("pkg-a"));
    }

    #[test]
    fn short_paths_truncate_package_dir() {
        let (_tmp, cache) = cache();
        let pref = PackageReference::new(zlib(), Blake3Hash::compute(b"id"));
        let long = cache.package(&pref, false);
        let short = cache.package(&pref, true);
        assert_eq!(
            short.file_name().unwrap().to_string_lossy().len(),
            SHORT_PATH_LEN
        );
        assert_ne!(long, short);
    }
}
