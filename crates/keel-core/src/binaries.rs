//! Binary identity and status analysis.
//!
//! Walks a resolved graph children-first, computes each node's package
//! identity from its declared settings subset, its option values, and the
//! identities of its non-build-time direct dependencies, then classifies
//! how the binary will be obtained: reused from cache, downloaded from a
//! remote, built locally, or skipped entirely.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use keel_schema::{PackageIdentity, PackageReference};

use crate::cache::CacheLayout;
use crate::error::CoreError;
use crate::graph::{DependencyGraph, NodeId};
use crate::manager::{GraphInfo, LoadOptions};
use crate::remote::RemoteSet;

/// How one node's binary will be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryStatus {
    /// A matching package folder is already cache-resident.
    Cache,
    /// A remote holds the binary; it will be fetched into the cache.
    Download {
        /// Name of the remote that holds it.
        remote: String,
    },
    /// The binary must be produced locally via the package method.
    Build {
        /// Whether a build-mode pattern forced this, overriding reuse.
        forced: bool,
    },
    /// Not realized at all: a local working copy, or a build-time-only
    /// dependency no retained node needs.
    Skip,
}

/// Per-node statuses of one analysis.
#[derive(Debug, Default)]
pub struct BinaryAnalysis {
    statuses: HashMap<NodeId, BinaryStatus>,
}

impl BinaryAnalysis {
    /// Status assigned to a node.
    pub fn status(&self, id: NodeId) -> Option<&BinaryStatus> {
        self.statuses.get(&id)
    }

    /// Iterate all assigned statuses.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &BinaryStatus)> {
        self.statuses.iter().map(|(id, s)| (*id, s))
    }

    /// Number of nodes with the given status.
    pub fn count(&self, wanted: impl Fn(&BinaryStatus) -> bool) -> usize {
        self.statuses.values().filter(|s| wanted(s)).count()
    }

    /// Replace one node's status. Export-pkg uses this to take the target
    /// node out of the regular install walk and package it itself.
    pub fn set_status(&mut self, id: NodeId, status: BinaryStatus) {
        self.statuses.insert(id, status);
    }
}

/// Computes package identities and binary statuses for a graph.
#[derive(Debug)]
pub struct BinaryAnalyzer<'a> {
    cache: &'a CacheLayout,
}

impl<'a> BinaryAnalyzer<'a> {
    /// Create an analyzer reading binaries from `cache`.
    pub fn new(cache: &'a CacheLayout) -> Self {
        Self { cache }
    }

    /// Fill in every node's `package_id` and classify its binary.
    ///
    /// Children-first: a node's identity depends on the already computed
    /// identities of its direct dependencies, so a dependency's identity
    /// is always final before any of its requesters are examined.
    ///
    /// # Errors
    ///
    /// [`CoreError::Configuration`] when a recipe declares a setting the
    /// profile does not define.
    pub async fn evaluate(
        &self,
        graph: &mut DependencyGraph,
        info: &GraphInfo,
        opts: &LoadOptions,
        remotes: &RemoteSet,
    ) -> Result<BinaryAnalysis, CoreError> {
        let mut analysis = BinaryAnalysis::default();

        for id in graph.topo_children_first() {
            let package_id = self.identity_of(graph, id, info)?;
            graph.node_mut(id).package_id = Some(package_id.clone());

            let node = graph.node(id);
            let reference = match &node.reference {
                Some(r) => r.clone(),
                None => continue,
            };
            let Some(recipe) = &node.recipe else { continue };

            // A reference without a pinned revision is the user's working
            // copy; it is never realized from cache or remote.
            if reference.revision.is_none() {
                analysis.statuses.insert(id, BinaryStatus::Skip);
                continue;
            }

            let pref = PackageReference::new(reference.clone(), package_id);
            let short_paths = recipe.short_paths;

            let status = if opts.build_mode.matches(&reference.name) {
                BinaryStatus::Build { forced: true }
            } else if self.cache.has_package(&pref, short_paths) {
                self.revalidate_cache_hit(&pref, short_paths, opts, remotes)
                    .await?
            } else if let Some((remote, _)) = remotes.find_package(&pref).await? {
                BinaryStatus::Download { remote }
            } else {
                BinaryStatus::Build { forced: false }
            };
            debug!(reference = %pref, ?status, "binary classified");
            analysis.statuses.insert(id, status);
        }

        self.skip_unneeded_build_deps(graph, &mut analysis);

        info!(
            cache = analysis.count(|s| matches!(s, BinaryStatus::Cache)),
            download = analysis.count(|s| matches!(s, BinaryStatus::Download { .. })),
            build = analysis.count(|s| matches!(s, BinaryStatus::Build { .. })),
            skip = analysis.count(|s| matches!(s, BinaryStatus::Skip)),
            "binaries analyzed"
        );
        Ok(analysis)
    }

    /// Identity from the declared settings subset, the option values, and
    /// the runtime direct dependencies' identities.
    fn identity_of(
        &self,
        graph: &DependencyGraph,
        id: NodeId,
        info: &GraphInfo,
    ) -> Result<keel_schema::Blake3Hash, CoreError> {
        let node = graph.node(id);
        let mut identity = PackageIdentity::new();

        if let Some(recipe) = &node.recipe {
            for key in &recipe.settings_keys {
                let value = info.settings.get(key).ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "Setting '{key}' required by '{}' is undefined in the profile",
                        recipe.name
                    ))
                })?;
                identity.setting(key, value);
            }
            for (key, value) in &recipe.options {
                identity.option(key, value);
            }
        }

        for edge in node.edges() {
            if !edge.kind.is_runtime() {
                continue;
            }
            let dep = graph.node(edge.target);
            let (Some(dep_ref), Some(dep_id)) = (&dep.reference, &dep.package_id) else {
                continue;
            };
            let Some(revision) = &dep_ref.revision else {
                return Err(CoreError::Configuration(format!(
                    "Dependency '{}' has no pinned revision",
                    dep_ref.name
                )));
            };
            identity.require(
                &dep_ref.name,
                keel_schema::DependencyIdentity {
                    recipe_revision: revision.clone(),
                    package_id: dep_id.clone(),
                },
            );
        }

        Ok(identity.package_id())
    }

    /// Re-check a cache hit against the remotes when asked to. An
    /// outdated cached binary flips to Download.
    async fn revalidate_cache_hit(
        &self,
        pref: &PackageReference,
        short_paths: bool,
        opts: &LoadOptions,
        remotes: &RemoteSet,
    ) -> Result<BinaryStatus, CoreError> {
        if !opts.check_updates && !opts.update {
            return Ok(BinaryStatus::Cache);
        }
        if let Some((remote, remote_manifest)) = remotes.find_package(pref).await? {
            let cached_summary = self
                .cache
                .package_manifest(pref, short_paths)?
                .map(|m| m.summary());
            if cached_summary.as_ref() != Some(&remote_manifest.summary()) {
                warn!(reference = %pref, remote, "cached package is outdated relative to remote");
                return Ok(BinaryStatus::Download { remote });
            }
        }
        Ok(BinaryStatus::Cache)
    }

    /// Demote build-time-only dependencies nobody needs to Skip.
    ///
    /// A node not reachable from the root over runtime edges exists only
    /// to build something. It is retained when some requester with a
    /// build-time edge to it will actually build, or when a retained
    /// build-only node needs it at its own runtime; otherwise it is
    /// skipped. Parents-first so every requester's final status is known
    /// when a node is examined.
    fn skip_unneeded_build_deps(&self, graph: &DependencyGraph, analysis: &mut BinaryAnalysis) {
        let mut runtime_reachable: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![graph.root()];
        runtime_reachable.insert(graph.root());
        while let Some(current) = stack.pop() {
            for edge in graph.node(current).edges() {
                if edge.kind.is_runtime() && runtime_reachable.insert(edge.target) {
                    stack.push(edge.target);
                }
            }
        }

        let order = graph.topo_children_first();
        for &id in order.iter().rev() {
            if runtime_reachable.contains(&id) {
                continue;
            }
            let needed = graph.node(id).inverse_neighbors().iter().any(|&parent| {
                if parent == graph.root() {
                    return false;
                }
                let parent_status = analysis.statuses.get(&parent);
                graph.node(parent).edges().iter().any(|edge| {
                    if edge.target != id {
                        return false;
                    }
                    if edge.kind.is_runtime() {
                        // Runtime dep of a retained build-only node.
                        !matches!(parent_status, Some(BinaryStatus::Skip))
                    } else {
                        matches!(parent_status, Some(BinaryStatus::Build { .. }))
                    }
                })
            });
            if !needed {
                debug!(node = graph.node(id).display(), "build-time dependency skipped");
                analysis.statuses.insert(id, BinaryStatus::Skip);
            }
        }
    }
}
