//! Graph locks.
//!
//! A graph lock is a snapshot of a prior resolution: for every node, the
//! revision-pinned reference and, when known, its package identity and
//! PREV. Attached to a later resolution it forces the same references to
//! be chosen again, and after install/export it is updated with the newly
//! assigned PREVs so the next run reproduces this one.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use keel_schema::{Blake3Hash, RecipeReference};

use crate::error::CoreError;

/// One pinned node in a graph lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedNode {
    /// Full reference string including the pinned revision.
    pub reference: String,
    /// Package identity captured at lock time, if binaries were analyzed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<Blake3Hash>,
    /// Package revision captured after install/export.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<Blake3Hash>,
}

/// A pinned snapshot of a resolved graph, keyed by package name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphLock {
    #[serde(default)]
    nodes: BTreeMap<String, LockedNode>,
}

impl GraphLock {
    /// An empty lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the pinned resolution for one name.
    pub fn pin(&mut self, reference: &RecipeReference) {
        let mut repr = reference.to_string();
        // Store the full revision, not the shortened display form.
        if let Some(rev) = &reference.revision {
            repr = format!(
                "{}/{}@{}/{}#{}",
                reference.name, reference.version, reference.user, reference.channel, rev
            );
        }
        self.nodes.insert(
            reference.name.clone(),
            LockedNode {
                reference: repr,
                package_id: None,
                prev: None,
            },
        );
    }

    /// The pinned reference for a name, parsed back with its revision.
    pub fn resolved(&self, name: &str) -> Option<RecipeReference> {
        self.nodes.get(name).and_then(|n| n.reference.parse().ok())
    }

    /// Record the package identity computed for a name.
    pub fn set_package_id(&mut self, name: &str, package_id: Blake3Hash) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.package_id = Some(package_id);
        }
    }

    /// Record the PREV assigned to a name after install or export.
    pub fn set_prev(&mut self, name: &str, prev: Blake3Hash) {
        if let Some(node) = self.nodes.get_mut(name) {
            node.prev = Some(prev);
        }
    }

    /// The recorded PREV for a name.
    pub fn prev(&self, name: &str) -> Option<&Blake3Hash> {
        self.nodes.get(name).and_then(|n| n.prev.as_ref())
    }

    /// Whether any node is pinned.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Load a lock from a TOML file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| CoreError::Configuration(format!("Malformed graph lock: {e}")))
    }

    /// Atomically persist this lock as TOML.
    ///
    /// Written to a temp file and renamed so readers never observe a
    /// partially written lock.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Configuration(format!("Lock serialization failed: {e}")))?;
        let tmp = path.with_extension("lock.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
