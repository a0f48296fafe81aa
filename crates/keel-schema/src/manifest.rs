//! File-tree manifests.
//!
//! A manifest maps every file in a folder to its content hash and exposes a
//! single summary hash over the whole tree. Manifests back two mechanisms:
//! up-to-date checks (compare a local manifest against a remote's) and
//! revision derivation (a recipe revision or PREV is the summary hash of
//! the corresponding tree, so identical content yields identical revisions).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Blake3Hash;

/// On-disk file name for a stored manifest. Excluded from scans so a
/// manifest never hashes itself.
pub const MANIFEST_FILE: &str = "keelmanifest.json";

/// Errors raised while building or persisting a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Filesystem error while scanning, reading, or writing.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored manifest file is not valid JSON.
    #[error("Malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),

    /// A scanned file path could not be expressed relative to the root.
    #[error("File outside manifest root: {0}")]
    OutsideRoot(String),
}

/// Ordered mapping from relative file path to content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTreeManifest {
    files: BTreeMap<String, Blake3Hash>,
}

impl FileTreeManifest {
    /// Scan `root` and hash every regular file below it.
    ///
    /// Paths are stored relative to `root` with `/` separators; the map is
    /// ordered, so two scans of identical content produce identical
    /// manifests. The stored manifest file itself is skipped.
    pub fn create(root: &Path) -> Result<Self, ManifestError> {
        let mut files = BTreeMap::new();
        for entry in walkdir::WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| ManifestError::OutsideRoot(entry.path().display().to_string()))?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            if rel == MANIFEST_FILE {
                continue;
            }
            let hash = Blake3Hash::compute_file(entry.path())?;
            files.insert(rel, hash);
        }
        Ok(Self { files })
    }

    /// Build a manifest directly from `(path, hash)` pairs. Used by remotes
    /// that transmit manifests without the underlying files.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Blake3Hash)>) -> Self {
        Self {
            files: entries.into_iter().collect(),
        }
    }

    /// The summary hash over all entries, in path order.
    ///
    /// This is the value recipe revisions and PREVs are derived from.
    pub fn summary(&self) -> Blake3Hash {
        let mut buf = String::new();
        for (path, hash) in &self.files {
            buf.push_str(path);
            buf.push(':');
            buf.push_str(hash.as_str());
            buf.push('\n');
        }
        Blake3Hash::compute(buf.as_bytes())
    }

    /// Number of files covered.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the manifest covers no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Hash recorded for one relative path, if present.
    pub fn get(&self, path: &str) -> Option<&Blake3Hash> {
        self.files.get(path)
    }

    /// Iterate over `(path, hash)` entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Blake3Hash)> {
        self.files.iter().map(|(p, h)| (p.as_str(), h))
    }

    /// Persist this manifest inside `dir` as [`MANIFEST_FILE`].
    ///
    /// Written to a temp file first and renamed into place so a concurrent
    /// reader never observes a half-written manifest.
    pub fn save(&self, dir: &Path) -> Result<(), ManifestError> {
        let content = serde_json::to_string_pretty(self)?;
        let target = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Load the manifest stored inside `dir`.
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Whether `dir` currently contains a stored manifest.
    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).exists()
    }
}
