//! Graph construction.
//!
//! Expands the full dependency DAG from a root input: recipes are loaded
//! through the [`RecipeLoader`] boundary, ranges resolved through the
//! [`RangeResolver`], and same-name requirements deduplicated into shared
//! nodes. Expansion is breadth-first and single-threaded per invocation:
//! every requirement must see a consistent, already-resolved view of its
//! prior siblings for deduplication to be correct.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;

use tracing::{debug, info};

use keel_schema::RecipeReference;

use crate::cache::CacheLayout;
use crate::error::{CoreError, ResolutionError};
use crate::graph::{DependencyGraph, EdgeKind, NodeId};
use crate::hooks::{HookEvent, Hooks};
use crate::lockfile::GraphLock;
use crate::recipe::{RecipeLoader, RecipeSource, Requirement, RequirementTarget};
use crate::remote::RemoteSet;
use crate::resolver::RangeResolver;

/// Pattern list forcing Build status and forbidding remote fetch for
/// matching references. Patterns are exact names or simple globs with a
/// leading or trailing `*`.
#[derive(Debug, Clone, Default)]
pub struct BuildMode {
    patterns: Vec<String>,
}

impl BuildMode {
    /// No forced references.
    pub fn none() -> Self {
        Self::default()
    }

    /// Force every reference whose name matches one of `patterns`.
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Whether `name` matches any pattern.
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| {
            if let Some(prefix) = p.strip_suffix('*') {
                name.starts_with(prefix)
            } else if let Some(suffix) = p.strip_prefix('*') {
                name.ends_with(suffix)
            } else {
                p == name
            }
        })
    }
}

/// Profile-derived inputs of one resolution: the settings/options bag and
/// an optional graph lock constraining re-resolution.
#[derive(Debug, Default)]
pub struct GraphInfo {
    /// Full profile settings bag; recipes pick their declared subset.
    pub settings: BTreeMap<String, String>,
    /// Root-level option values, handed to every recipe evaluation.
    pub options: BTreeMap<String, String>,
    /// Pinned snapshot of a prior resolution, when reproducing one.
    pub lock: Option<GraphLock>,
}

/// Behavior flags for one load/evaluate cycle.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// References excluded from cache/remote binary reuse.
    pub build_mode: BuildMode,
    /// Revalidate cache hits against remote revisions.
    pub check_updates: bool,
    /// Prefer newer remote recipe revisions over cached ones.
    pub update: bool,
}

/// The root of a resolution: a working-copy recipe or a pinned reference.
#[derive(Debug, Clone)]
pub enum RootInput {
    /// Path to a recipe file in the user's working tree.
    Path(PathBuf),
    /// A reference whose recipe must exist in cache or on a remote.
    Reference(RecipeReference),
}

impl std::fmt::Display for RootInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RootInput::Path(p) => write!(f, "{}", p.display()),
            RootInput::Reference(r) => write!(f, "{r}"),
        }
    }
}

/// Builds dependency graphs.
pub struct GraphManager<'a> {
    cache: &'a CacheLayout,
    loader: &'a dyn RecipeLoader,
    hooks: &'a Hooks,
}

impl std::fmt::Debug for GraphManager<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphManager")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<'a> GraphManager<'a> {
    /// Create a manager over the given cache, loader, and hooks.
    pub fn new(cache: &'a CacheLayout, loader: &'a dyn RecipeLoader, hooks: &'a Hooks) -> Self {
        Self {
            cache,
            loader,
            hooks,
        }
    }

    /// Resolve the full dependency graph for `root`.
    ///
    /// # Errors
    ///
    /// Any [`ResolutionError`] aborts construction: a graph with an
    /// unresolved shape cannot safely be installed.
    pub async fn load_graph(
        &self,
        root: &RootInput,
        info: &GraphInfo,
        opts: &LoadOptions,
        remotes: &RemoteSet,
    ) -> Result<DependencyGraph, CoreError> {
        self.hooks.notify(&HookEvent::PreGraphLoad {
            root: &root.to_string(),
        });

        let mut graph = DependencyGraph::new();
        let mut by_name: HashMap<String, NodeId> = HashMap::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();

        // Place the root recipe as the single child of the synthetic root.
        let (root_ref, root_recipe) = match root {
            RootInput::Path(path) => {
                let recipe = self.loader.load(
                    &RecipeSource::Path(path.clone()),
                    &info.options,
                    &info.settings,
                )?;
                let reference =
                    RecipeReference::new(&recipe.name, recipe.version.as_str(), "_", "_");
                (reference, recipe)
            }
            RootInput::Reference(reference) => {
                let resolved = self
                    .ensure_recipe(
                        reference.clone(),
                        remotes,
                        !opts.build_mode.matches(&reference.name),
                        opts.update,
                    )
                    .await?;
                let recipe = self.loader.load(
                    &RecipeSource::Reference(resolved.clone()),
                    &info.options,
                    &info.settings,
                )?;
                (resolved, recipe)
            }
        };
        let root_id = graph.root();
        let node = graph.add_node(root_ref.clone(), root_recipe, BTreeMap::new());
        graph.add_edge(root_id, node, EdgeKind::Normal);
        by_name.insert(root_ref.name.clone(), node);
        queue.push_back(node);

        // Breadth-first requirement expansion.
        while let Some(current) = queue.pop_front() {
            let requirements = graph
                .node(current)
                .recipe
                .as_ref()
                .map(|r| r.requires.clone())
                .unwrap_or_default();
            let inherited = graph.node(current).overrides.clone();
            let requester = graph.node(current).display();

            for requirement in requirements {
                let name = requirement.name().to_string();
                let allow_remotes = !opts.build_mode.matches(&name);
                let resolved = self
                    .resolve_requirement(&requirement, &inherited, info, remotes, allow_remotes)
                    .await?;

                let kind = if requirement.build_time {
                    EdgeKind::BuildTime
                } else if requirement.private {
                    EdgeKind::Private
                } else {
                    EdgeKind::Normal
                };

                if let Some(&existing) = by_name.get(&name) {
                    // Diamond deduplication: reuse the placed node, or
                    // fail when the versions genuinely disagree.
                    let placed = graph
                        .node(existing)
                        .reference
                        .clone()
                        .unwrap_or_else(|| resolved.clone());
                    if placed != resolved {
                        let first_requester = graph
                            .node(existing)
                            .inverse_neighbors()
                            .first()
                            .map_or_else(|| "<root>".to_string(), |&p| graph.node(p).display());
                        return Err(ResolutionError::Conflict {
                            name,
                            first_requester,
                            first: placed.to_string(),
                            second_requester: requester.clone(),
                            second: resolved.to_string(),
                        }
                        .into());
                    }
                    if graph.would_cycle(current, existing) {
                        return Err(ResolutionError::Cycle(name).into());
                    }
                    graph.add_edge(current, existing, kind);
                    debug!(name, requester = %requester, "requirement deduplicated");
                    continue;
                }

                let recipe = self.loader.load(
                    &RecipeSource::Reference(resolved.clone()),
                    &info.options,
                    &info.settings,
                )?;
                if recipe.name != name {
                    return Err(CoreError::Configuration(format!(
                        "Recipe at '{resolved}' declares name '{}', required as '{name}'",
                        recipe.name
                    )));
                }

                let mut child_overrides = inherited.clone();
                for (k, v) in &requirement.overrides {
                    child_overrides.insert(k.clone(), v.clone());
                }

                let child = graph.add_node(resolved, recipe, child_overrides);
                graph.add_edge(current, child, kind);
                by_name.insert(name, child);
                queue.push_back(child);
            }
        }

        graph.compute_closures();
        info!(nodes = graph.len(), "dependency graph resolved");
        self.hooks
            .notify(&HookEvent::PostGraphLoad { nodes: graph.len() });
        Ok(graph)
    }

    /// Resolve one requirement to a revision-pinned concrete reference.
    async fn resolve_requirement(
        &self,
        requirement: &Requirement,
        inherited_overrides: &BTreeMap<String, RecipeReference>,
        info: &GraphInfo,
        remotes: &RemoteSet,
        allow_remotes: bool,
    ) -> Result<RecipeReference, CoreError> {
        let name = requirement.name();

        // A graph lock pins the outcome before anything else is consulted.
        if let Some(lock) = &info.lock {
            if let Some(pinned) = lock.resolved(name) {
                return self
                    .ensure_recipe(pinned, remotes, allow_remotes, false)
                    .await;
            }
        }

        // Overrides declared by requesters above replace the target.
        if let Some(forced) = inherited_overrides.get(name) {
            debug!(name, forced = %forced, "override applied");
            return self
                .ensure_recipe(forced.clone(), remotes, allow_remotes, false)
                .await;
        }

        let reference = match &requirement.target {
            RequirementTarget::Pinned(reference) => reference.clone(),
            RequirementTarget::Range {
                name,
                range,
                user,
                channel,
            } => {
                let resolver = RangeResolver::new(self.cache);
                resolver
                    .resolve(name, range, user, channel, remotes, allow_remotes)
                    .await?
            }
        };
        self.ensure_recipe(reference, remotes, allow_remotes, false)
            .await
    }

    /// Pin a reference's recipe revision, fetching the recipe into the
    /// cache export folder when it is only known remotely.
    ///
    /// Fetched recipe content is verified against the transmitted
    /// manifest before the export is accepted.
    async fn ensure_recipe(
        &self,
        reference: RecipeReference,
        remotes: &RemoteSet,
        allow_remotes: bool,
        update: bool,
    ) -> Result<RecipeReference, CoreError> {
        if self.cache.has_recipe(&reference) {
            let cached_revision = self.cache.metadata(&reference)?.recipe_revision;
            if update && allow_remotes {
                if let Some((remote_name, remote_manifest)) =
                    remotes.find_recipe(&reference).await?
                {
                    if Some(remote_manifest.summary()) != cached_revision {
                        debug!(reference = %reference, remote = remote_name, "recipe updated from remote");
                        return self.fetch_recipe(&reference, remotes).await;
                    }
                }
            }
            return match cached_revision {
                Some(revision) => Ok(reference.with_revision(revision)),
                None => {
                    // Export present but metadata lost: re-derive.
                    let manifest = self
                        .cache
                        .recipe_manifest(&reference)?
                        .ok_or_else(|| ResolutionError::NotFound(reference.to_string()))?;
                    Ok(reference.with_revision(manifest.summary()))
                }
            };
        }

        if allow_remotes && remotes.find_recipe(&reference).await?.is_some() {
            return self.fetch_recipe(&reference, remotes).await;
        }

        Err(ResolutionError::NotFound(reference.to_string()).into())
    }

    async fn fetch_recipe(
        &self,
        reference: &RecipeReference,
        remotes: &RemoteSet,
    ) -> Result<RecipeReference, CoreError> {
        for remote in remotes.iter() {
            if remote.recipe_manifest(reference).await?.is_none() {
                continue;
            }
            let (files, manifest) = remote.get_recipe(reference).await?;
            let revision = self.cache.export_recipe(reference, &files)?;
            if revision != manifest.summary() {
                return Err(CoreError::Integrity {
                    reference: reference.to_string(),
                    expected: manifest.summary(),
                    got: revision,
                });
            }
            return Ok(reference.clone().with_revision(revision));
        }
        Err(ResolutionError::NotFound(reference.to_string()).into())
    }
}

/// Capture a lock pinning every resolved node of `graph`.
pub fn capture_lock(graph: &DependencyGraph) -> GraphLock {
    let mut lock = GraphLock::new();
    for id in graph.node_ids() {
        let node = graph.node(id);
        if let Some(reference) = &node.reference {
            lock.pin(reference);
            if let Some(package_id) = &node.package_id {
                lock.set_package_id(&reference.name, package_id.clone());
            }
            if let Some(prev) = &node.prev {
                lock.set_prev(&reference.name, prev.clone());
            }
        }
    }
    lock
}
