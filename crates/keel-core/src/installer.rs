//! Binary realization.
//!
//! Walks the analyzed graph in children-first topological layers and
//! realizes every node's binary according to its status. Nodes within a
//! layer have no edges between them and are processed concurrently; a
//! layer only starts once the previous one is fully settled, so a build
//! always sees the realized package folders of its entire closure.
//!
//! A node failure cascades upward only: every transitive requester is
//! cancelled, while unrelated siblings keep going. The caller receives an
//! aggregated report instead of a first-error abort.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use keel_schema::{Blake3Hash, FileTreeManifest, PackageReference, RecipeReference};

use crate::binaries::{BinaryAnalysis, BinaryStatus};
use crate::build::{BuildContext, DependencyPath, PackageMethod};
use crate::cache::CacheLayout;
use crate::error::CoreError;
use crate::graph::{DependencyGraph, NodeId};
use crate::hooks::{HookEvent, Hooks};
use crate::recipe::Recipe;
use crate::remote::RemoteSet;

/// What happened to one node during an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Cache-resident binary verified and reused, nothing written.
    Reused,
    /// Binary fetched from the named remote into the cache.
    Downloaded {
        /// Remote the binary came from.
        remote: String,
    },
    /// Binary produced locally by the package method.
    Built,
    /// Node had Skip status; nothing was realized.
    Skipped,
    /// The node's own realization failed.
    Failed {
        /// Rendered error.
        message: String,
    },
    /// A dependency failed, so this node was never attempted.
    Cancelled {
        /// Display name of the failed or cancelled dependency.
        failed_dependency: String,
    },
}

/// Per-node record in an install report.
#[derive(Debug, Clone)]
pub struct NodeReport {
    /// The node's resolved reference.
    pub reference: RecipeReference,
    /// Full package reference, for nodes that got far enough to have one.
    pub package: Option<PackageReference>,
    /// What happened.
    pub outcome: NodeOutcome,
}

/// Aggregated result of one install walk.
#[derive(Debug, Default)]
pub struct InstallReport {
    nodes: Vec<NodeReport>,
}

impl InstallReport {
    /// All per-node records, in realization order.
    pub fn nodes(&self) -> &[NodeReport] {
        &self.nodes
    }

    /// The outcome recorded for a package name.
    pub fn outcome_of(&self, name: &str) -> Option<&NodeOutcome> {
        self.nodes
            .iter()
            .find(|n| n.reference.name == name)
            .map(|n| &n.outcome)
    }

    /// Records of nodes whose own realization failed.
    pub fn failures(&self) -> Vec<&NodeReport> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.outcome, NodeOutcome::Failed { .. }))
            .collect()
    }

    /// Whether every node was realized or legitimately skipped.
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|n| {
            !matches!(
                n.outcome,
                NodeOutcome::Failed { .. } | NodeOutcome::Cancelled { .. }
            )
        })
    }
}

/// Owned inputs of one node's realization task.
struct NodeJob {
    id: NodeId,
    reference: RecipeReference,
    package_id: Blake3Hash,
    recipe: Recipe,
    short_paths: bool,
    status: BinaryStatus,
    dependencies: Vec<DependencyPath>,
}

/// Realizes the binaries of an analyzed graph.
pub struct BinaryInstaller {
    cache: CacheLayout,
    remotes: RemoteSet,
    package_method: Arc<dyn PackageMethod>,
    overwrite: bool,
}

impl std::fmt::Debug for BinaryInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryInstaller")
            .field("cache", &self.cache)
            .field("overwrite", &self.overwrite)
            .finish_non_exhaustive()
    }
}

impl BinaryInstaller {
    /// Create an installer.
    ///
    /// `overwrite` permits replacing an existing package folder when a
    /// forced build targets it; without it that situation is fatal.
    pub fn new(
        cache: CacheLayout,
        remotes: RemoteSet,
        package_method: Arc<dyn PackageMethod>,
        overwrite: bool,
    ) -> Self {
        Self {
            cache,
            remotes,
            package_method,
            overwrite,
        }
    }

    /// Realize every node of `graph` per its analyzed status.
    ///
    /// On success each realized node carries its PREV in the graph, the
    /// cache metadata records it, and the report holds one record per
    /// node. Errors are aggregated into the report; only infrastructure
    /// failures (a panicked worker) surface as `Err`.
    pub async fn install(
        &self,
        graph: &mut DependencyGraph,
        analysis: &BinaryAnalysis,
        hooks: &Hooks,
    ) -> Result<InstallReport, CoreError> {
        let mut report = InstallReport::default();
        // Failed or cancelled nodes, with the display name to blame.
        let mut blocked: HashMap<NodeId, String> = HashMap::new();

        for layer in graph.layers_children_first() {
            let mut tasks: JoinSet<(NodeId, Result<(PackageReference, Blake3Hash, NodeOutcome), CoreError>)> =
                JoinSet::new();

            for id in layer {
                let node = graph.node(id);
                let Some(reference) = node.reference.clone() else {
                    continue;
                };
                let status = analysis.status(id).cloned().unwrap_or(BinaryStatus::Skip);

                if status == BinaryStatus::Skip {
                    report.nodes.push(NodeReport {
                        reference,
                        package: None,
                        outcome: NodeOutcome::Skipped,
                    });
                    continue;
                }

                if let Some(culprit) = node
                    .edges()
                    .iter()
                    .find_map(|e| blocked.get(&e.target).cloned())
                {
                    debug!(node = %reference, culprit, "install cancelled");
                    blocked.insert(id, culprit.clone());
                    report.nodes.push(NodeReport {
                        reference,
                        package: None,
                        outcome: NodeOutcome::Cancelled {
                            failed_dependency: culprit,
                        },
                    });
                    continue;
                }

                let job = match self.prepare_job(graph, id, status) {
                    Ok(job) => job,
                    Err(e) => {
                        let message = e.to_string();
                        error!(node = %reference, message, "install preparation failed");
                        blocked.insert(id, reference.to_string());
                        report.nodes.push(NodeReport {
                            reference,
                            package: None,
                            outcome: NodeOutcome::Failed { message },
                        });
                        continue;
                    }
                };

                hooks.notify(&HookEvent::PreNodeInstall {
                    reference: &reference,
                });

                let cache = self.cache.clone();
                let remotes = self.remotes.clone();
                let package_method = Arc::clone(&self.package_method);
                let overwrite = self.overwrite;
                tasks.spawn(async move {
                    let id = job.id;
                    let result = realize(&cache, &remotes, package_method, overwrite, job).await;
                    (id, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (id, result) = joined.map_err(|e| CoreError::Build {
                    reference: "<worker>".to_string(),
                    message: format!("install worker panicked: {e}"),
                })?;
                let node = graph.node_mut(id);
                let reference = node
                    .reference
                    .clone()
                    .unwrap_or_else(|| RecipeReference::new("_", "0", "_", "_"));
                match result {
                    Ok((package, prev, outcome)) => {
                        node.prev = Some(prev);
                        hooks.notify(&HookEvent::PostNodeInstall {
                            reference: &package,
                        });
                        report.nodes.push(NodeReport {
                            reference,
                            package: Some(package),
                            outcome,
                        });
                    }
                    Err(e) => {
                        let message = e.to_string();
                        error!(node = %reference, message, "install failed");
                        blocked.insert(id, reference.to_string());
                        report.nodes.push(NodeReport {
                            reference,
                            package: None,
                            outcome: NodeOutcome::Failed { message },
                        });
                    }
                }
            }
        }

        info!(
            nodes = report.nodes.len(),
            failures = report.failures().len(),
            "install finished"
        );
        Ok(report)
    }

    /// Collect everything a realization task needs into owned data.
    fn prepare_job(
        &self,
        graph: &DependencyGraph,
        id: NodeId,
        status: BinaryStatus,
    ) -> Result<NodeJob, CoreError> {
        let node = graph.node(id);
        let reference = node
            .reference
            .clone()
            .ok_or_else(|| CoreError::Configuration("cannot install the root".to_string()))?;
        let package_id = node.package_id.clone().ok_or_else(|| {
            CoreError::Configuration(format!("'{reference}' has no package identity"))
        })?;
        let recipe = node
            .recipe
            .clone()
            .ok_or_else(|| CoreError::Configuration(format!("'{reference}' has no recipe")))?;

        // Realized package folders of the public closure, closure order.
        let mut dependencies = Vec::with_capacity(node.closure.len());
        for &dep_id in &node.closure {
            let dep = graph.node(dep_id);
            let (Some(dep_ref), Some(dep_pkg)) = (&dep.reference, &dep.package_id) else {
                continue;
            };
            let dep_short = dep.recipe.as_ref().is_some_and(|r| r.short_paths);
            let pref = PackageReference::new(dep_ref.clone(), dep_pkg.clone());
            dependencies.push(DependencyPath {
                name: dep_ref.name.clone(),
                path: self.cache.package(&pref, dep_short),
            });
        }

        Ok(NodeJob {
            id,
            reference,
            package_id,
            short_paths: recipe.short_paths,
            recipe,
            status,
            dependencies,
        })
    }
}

/// Realize one node per its status. Runs inside a worker task.
async fn realize(
    cache: &CacheLayout,
    remotes: &RemoteSet,
    package_method: Arc<dyn PackageMethod>,
    overwrite: bool,
    job: NodeJob,
) -> Result<(PackageReference, Blake3Hash, NodeOutcome), CoreError> {
    let pref = PackageReference::new(job.reference.clone(), job.package_id.clone());
    match &job.status {
        BinaryStatus::Cache => reuse(cache, &pref, job.short_paths),
        BinaryStatus::Download { remote } => {
            let remote = remote.clone();
            download(cache, remotes, &remote, &pref, job.short_paths).await
        }
        BinaryStatus::Build { .. } => build(cache, package_method, overwrite, pref, job).await,
        BinaryStatus::Skip => Err(CoreError::Configuration(format!(
            "'{pref}' with skip status reached realization"
        ))),
    }
}

/// Verify a cache-resident binary and report its PREV. Never writes.
fn reuse(
    cache: &CacheLayout,
    pref: &PackageReference,
    short_paths: bool,
) -> Result<(PackageReference, Blake3Hash, NodeOutcome), CoreError> {
    let manifest = cache
        .package_manifest(pref, short_paths)?
        .ok_or_else(|| {
            CoreError::Configuration(format!("Cache-resident package '{pref}' has no manifest"))
        })?;
    let recorded = cache
        .metadata(&pref.recipe)?
        .packages
        .get(pref.package_id.as_str())
        .map(|r| r.prev.clone());
    let prev = recorded.unwrap_or_else(|| manifest.summary());
    debug!(reference = %pref, "binary reused from cache");
    Ok((pref.clone().with_prev(prev.clone()), prev, NodeOutcome::Reused))
}

/// Fetch a binary from a remote, verify it, and publish it atomically.
async fn download(
    cache: &CacheLayout,
    remotes: &RemoteSet,
    remote_name: &str,
    pref: &PackageReference,
    short_paths: bool,
) -> Result<(PackageReference, Blake3Hash, NodeOutcome), CoreError> {
    let remote = remotes
        .get(remote_name)
        .ok_or_else(|| CoreError::remote(remote_name, "remote disappeared during install"))?;
    let (files, transmitted) = remote.get_package(pref).await?;

    let staged = cache.stage_dir()?;
    for (rel, bytes) in &files {
        let dest = crate::cache::checked_join(staged.path(), rel)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, bytes)?;
    }
    let computed = FileTreeManifest::create(staged.path())?;
    if computed.summary() != transmitted.summary() {
        return Err(CoreError::Integrity {
            reference: pref.to_string(),
            expected: transmitted.summary(),
            got: computed.summary(),
        });
    }
    computed.save(staged.path())?;
    cache.publish_package(pref, short_paths, staged, true)?;

    let prev = computed.summary();
    record_prev(cache, pref, &prev)?;
    debug!(reference = %pref, remote = remote_name, "binary downloaded");
    Ok((
        pref.clone().with_prev(prev.clone()),
        prev,
        NodeOutcome::Downloaded {
            remote: remote_name.to_string(),
        },
    ))
}

/// Run the package method into a staged folder, manifest it, publish it.
async fn build(
    cache: &CacheLayout,
    package_method: Arc<dyn PackageMethod>,
    overwrite: bool,
    pref: PackageReference,
    job: NodeJob,
) -> Result<(PackageReference, Blake3Hash, NodeOutcome), CoreError> {
    if cache.has_package(&pref, job.short_paths) && !overwrite {
        return Err(CoreError::AlreadyExists(format!(
            "Package folder for '{pref}' already exists; a forced build refuses to replace it \
             without overwrite permission"
        )));
    }

    let staged = cache.stage_dir()?;
    let dest = staged.path().to_path_buf();
    let recipe = job.recipe;
    let package_id = job.package_id;
    let dependencies = job.dependencies;
    let build_result = tokio::task::spawn_blocking(move || {
        let ctx = BuildContext {
            recipe: &recipe,
            package_id: &package_id,
            dependencies: &dependencies,
            options: &recipe.options,
            source_dir: None,
            build_dir: None,
            dest_dir: &dest,
        };
        package_method.run(&ctx)
    })
    .await
    .map_err(|e| CoreError::Build {
        reference: pref.to_string(),
        message: format!("build worker panicked: {e}"),
    })?;
    build_result.map_err(|e| CoreError::Build {
        reference: pref.to_string(),
        message: e.to_string(),
    })?;

    let manifest = FileTreeManifest::create(staged.path())?;
    manifest.save(staged.path())?;
    cache.publish_package(&pref, job.short_paths, staged, overwrite)?;

    let prev = manifest.summary();
    record_prev(cache, &pref, &prev)?;
    debug!(reference = %pref, "binary built");
    Ok((pref.clone().with_prev(prev.clone()), prev, NodeOutcome::Built))
}

/// Record a package's PREV in the reference metadata.
pub(crate) fn record_prev(
    cache: &CacheLayout,
    pref: &PackageReference,
    prev: &Blake3Hash,
) -> Result<(), CoreError> {
    let recipe_revision = pref.recipe.revision.clone();
    let package_id = pref.package_id.as_str().to_string();
    let prev = prev.clone();
    cache.update_metadata(&pref.recipe, move |metadata| {
        metadata.packages.insert(
            package_id,
            crate::cache::PackageRecord {
                prev,
                recipe_revision,
            },
        );
    })?;
    Ok(())
}
