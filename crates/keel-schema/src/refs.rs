//! Recipe and package references.
//!
//! A recipe reference names a logical recipe
//! (`name/version@user/channel`, optionally pinned to a recipe revision
//! with `#rev`). A package reference extends it with the package identity
//! and, once content exists, the package revision (PREV).

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::hash::Blake3Hash;
use crate::version::Version;

/// Errors produced when parsing a reference string.
#[derive(Error, Debug)]
pub enum RefError {
    /// The string does not match `name/version[@user/channel][#revision]`.
    #[error("Invalid reference '{0}': expected name/version[@user/channel][#revision]")]
    Malformed(String),

    /// A reference component (name, version, user, channel) is empty.
    #[error("Invalid reference '{0}': empty {1}")]
    EmptyComponent(String, &'static str),
}

/// A reference to a recipe: `(name, version, user, channel[, revision])`.
///
/// Equality and hashing ignore the revision: two references to the same
/// logical recipe compare equal even when they pin different content. Use
/// [`RecipeReference::same_pinned`] when revision identity matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeReference {
    /// Package name (e.g. `zlib`).
    pub name: String,
    /// Version of the recipe.
    pub version: Version,
    /// Owning user namespace (e.g. `core`).
    pub user: String,
    /// Release channel (e.g. `stable`).
    pub channel: String,
    /// Recipe revision: the summary hash of the exported recipe content.
    /// Absent until resolution pins one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Blake3Hash>,
}

impl PartialEq for RecipeReference {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.user == other.user
            && self.channel == other.channel
    }
}

impl Eq for RecipeReference {}

impl std::hash::Hash for RecipeReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.version.hash(state);
        self.user.hash(state);
        self.channel.hash(state);
    }
}

impl RecipeReference {
    /// Create a reference with no pinned revision.
    pub fn new(name: &str, version: &str, user: &str, channel: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Version::new(version),
            user: user.to_string(),
            channel: channel.to_string(),
            revision: None,
        }
    }

    /// Return a copy with the given revision pinned.
    pub fn with_revision(mut self, revision: Blake3Hash) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Return a copy with the revision cleared.
    pub fn without_revision(mut self) -> Self {
        self.revision = None;
        self
    }

    /// Strict comparison: equal logical reference *and* equal pinned
    /// revision. Two unpinned references are never `same_pinned`.
    pub fn same_pinned(&self, other: &Self) -> bool {
        self == other
            && matches!((&self.revision, &other.revision), (Some(a), Some(b)) if a == b)
    }

    /// Directory-safe identity string: `name/version/user/channel`.
    pub fn dir_repr(&self) -> String {
        format!("{}/{}/{}/{}", self.name, self.version, self.user, self.channel)
    }
}

impl std::fmt::Display for RecipeReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@{}/{}",
            self.name, self.version, self.user, self.channel
        )?;
        if let Some(rev) = &self.revision {
            write!(f, "#{}", rev.short())?;
        }
        Ok(())
    }
}

impl FromStr for RecipeReference {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (body, revision) = match s.split_once('#') {
            Some((body, rev)) => (body, Some(Blake3Hash::new(rev))),
            None => (s, None),
        };

        let (pkg, namespace) = match body.split_once('@') {
            Some((pkg, ns)) => (pkg, ns),
            None => (body, "_/_"),
        };

        let (name, version) = pkg
            .split_once('/')
            .ok_or_else(|| RefError::Malformed(s.to_string()))?;
        let (user, channel) = namespace
            .split_once('/')
            .ok_or_else(|| RefError::Malformed(s.to_string()))?;

        for (value, what) in [
            (name, "name"),
            (version, "version"),
            (user, "user"),
            (channel, "channel"),
        ] {
            if value.is_empty() {
                return Err(RefError::EmptyComponent(s.to_string(), what));
            }
        }

        Ok(Self {
            name: name.to_string(),
            version: Version::new(version),
            user: user.to_string(),
            channel: channel.to_string(),
            revision,
        })
    }
}

/// A reference to one binary package: a recipe reference plus the package
/// identity, plus the package revision (PREV) once content is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageReference {
    /// The recipe this package was built from.
    pub recipe: RecipeReference,
    /// Deterministic hash of the package's binary-relevant inputs.
    pub package_id: Blake3Hash,
    /// Package revision: summary hash of the produced artifact tree.
    /// `None` on planned nodes; `Some` once installed or exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<Blake3Hash>,
}

impl PackageReference {
    /// Create a package reference without a finalized PREV.
    pub fn new(recipe: RecipeReference, package_id: Blake3Hash) -> Self {
        Self {
            recipe,
            package_id,
            prev: None,
        }
    }

    /// Return a copy with the PREV finalized.
    pub fn with_prev(mut self, prev: Blake3Hash) -> Self {
        self.prev = Some(prev);
        self
    }
}

impl std::fmt::Display for PackageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.recipe, self.package_id.short())?;
        if let Some(prev) = &self.prev {
            write!(f, "#{}", prev.short())?;
        }
        Ok(())
    }
}
