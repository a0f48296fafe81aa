//! Package identity hashing.
//!
//! The package identity (`package_id`) is the deterministic hash of
//! everything that can change a binary: the recipe's declared settings
//! subset, its declared options subset, and the identity of each direct
//! binary-relevant dependency. Binary compatibility is declared, not
//! incidental: inputs the recipe does not declare never enter the hash, so
//! an unrelated transitive change cannot invalidate a binary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Blake3Hash;

/// Accumulates the binary-relevant inputs of one graph node and digests
/// them into a `package_id`.
///
/// All three input groups are kept in sorted maps, so the order in which
/// settings, options, or requirements were declared has no effect on the
/// resulting identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
    settings: BTreeMap<String, String>,
    options: BTreeMap<String, String>,
    requires: BTreeMap<String, DependencyIdentity>,
}

/// The identity contribution of one direct dependency: its pinned recipe
/// revision plus its own computed `package_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyIdentity {
    /// Recipe revision of the dependency.
    pub recipe_revision: Blake3Hash,
    /// The dependency's own package identity.
    pub package_id: Blake3Hash,
}

impl PackageIdentity {
    /// Start an empty identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one declared setting value (e.g. `os = Linux`).
    pub fn setting(&mut self, key: &str, value: &str) {
        self.settings.insert(key.to_string(), value.to_string());
    }

    /// Record one declared option value (e.g. `shared = True`).
    pub fn option(&mut self, key: &str, value: &str) {
        self.options.insert(key.to_string(), value.to_string());
    }

    /// Record one direct dependency's identity, keyed by its name.
    pub fn require(&mut self, name: &str, dep: DependencyIdentity) {
        self.requires.insert(name.to_string(), dep);
    }

    /// Digest the accumulated inputs into the `package_id`.
    ///
    /// The encoding is a canonical line-per-entry text form over the sorted
    /// maps; identical inputs always produce identical identities.
    pub fn package_id(&self) -> Blake3Hash {
        let mut buf = String::new();
        buf.push_str("[settings]\n");
        for (k, v) in &self.settings {
            buf.push_str(k);
            buf.push('=');
            buf.push_str(v);
            buf.push('\n');
        }
        buf.push_str("[options]\n");
        for (k, v) in &self.options {
            buf.push_str(k);
            buf.push('=');
            buf.push_str(v);
            buf.push('\n');
        }
        buf.push_str("[requires]\n");
        for (name, dep) in &self.requires {
            buf.push_str(name);
            buf.push('/');
            buf.push_str(dep.recipe_revision.as_str());
            buf.push(':');
            buf.push_str(dep.package_id.as_str());
            buf.push('\n');
        }
        Blake3Hash::compute(buf.as_bytes())
    }
}
