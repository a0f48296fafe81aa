//! Export of locally produced binaries.
//!
//! Export-pkg registers an artifact tree the user built outside the
//! normal install flow as a first-class binary package: the target's
//! graph is resolved with the target itself excluded from remote reuse,
//! its dependencies are installed, the artifact is captured (copied from
//! a pre-built folder or produced by the package method), manifested,
//! and published under the computed package identity.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task;
use tracing::info;

use keel_schema::{FileTreeManifest, PackageReference, RecipeReference};

use crate::binaries::{BinaryAnalyzer, BinaryStatus};
use crate::build::{BuildContext, DependencyPath, PackageMethod};
use crate::cache::CacheLayout;
use crate::error::{CoreError, ResolutionError};
use crate::graph::DependencyGraph;
use crate::hooks::{HookEvent, Hooks};
use crate::installer::{record_prev, BinaryInstaller};
use crate::lockfile::GraphLock;
use crate::manager::{capture_lock, BuildMode, GraphInfo, GraphManager, LoadOptions, RootInput};
use crate::recipe::RecipeLoader;
use crate::remote::RemoteSet;

/// One export-pkg invocation.
#[derive(Debug, Clone)]
pub struct ExportPkgRequest {
    /// Target reference; its recipe must already be cache-resident.
    pub reference: RecipeReference,
    /// Pre-built artifact tree to register verbatim. When absent the
    /// package method produces the tree instead.
    pub package_folder: Option<PathBuf>,
    /// Source tree handed to the package method.
    pub source_folder: Option<PathBuf>,
    /// Build tree handed to the package method.
    pub build_folder: Option<PathBuf>,
    /// Replace an existing package folder instead of failing.
    pub force: bool,
}

/// Outcome of a successful export-pkg.
#[derive(Debug)]
pub struct ExportPkgResult {
    /// The registered package, PREV included.
    pub package: PackageReference,
    /// Lock pinning the resolution this export was computed against.
    pub lock: GraphLock,
}

/// Register a locally produced binary as a package.
///
/// # Errors
///
/// [`ResolutionError::NotFound`] when the recipe was never exported;
/// [`CoreError::AlreadyExists`] when the package folder exists and
/// `force` is not set.
#[allow(clippy::too_many_arguments)]
pub async fn export_pkg(
    cache: &CacheLayout,
    loader: &dyn RecipeLoader,
    package_method: &Arc<dyn PackageMethod>,
    hooks: &Hooks,
    info: &GraphInfo,
    remotes: &RemoteSet,
    request: ExportPkgRequest,
) -> Result<ExportPkgResult, CoreError> {
    let reference = request.reference.clone().without_revision();
    if !cache.has_recipe(&reference) {
        return Err(ResolutionError::NotFound(reference.to_string()).into());
    }

    // The target is being produced here, so nothing may satisfy it from
    // a remote or rebuild it inside the install walk.
    let opts = LoadOptions {
        build_mode: BuildMode::new(vec![reference.name.clone()]),
        ..LoadOptions::default()
    };

    let manager = GraphManager::new(cache, loader, hooks);
    let mut graph = manager
        .load_graph(&RootInput::Reference(reference.clone()), info, &opts, remotes)
        .await?;

    let analyzer = BinaryAnalyzer::new(cache);
    let mut analysis = analyzer.evaluate(&mut graph, info, &opts, remotes).await?;

    let target = graph
        .root_children()
        .first()
        .copied()
        .ok_or_else(|| CoreError::Configuration("export-pkg resolved an empty graph".to_string()))?;
    let node = graph.node(target);
    let resolved = node
        .reference
        .clone()
        .ok_or_else(|| CoreError::Configuration("export-pkg target has no reference".to_string()))?;
    let package_id = node
        .package_id
        .clone()
        .ok_or_else(|| CoreError::Configuration("export-pkg target has no identity".to_string()))?;
    let recipe = node
        .recipe
        .clone()
        .ok_or_else(|| CoreError::Configuration("export-pkg target has no recipe".to_string()))?;
    let pref = PackageReference::new(resolved, package_id.clone());

    if cache.has_package(&pref, recipe.short_paths) {
        if request.force {
            cache.remove_package(&pref, recipe.short_paths)?;
        } else {
            return Err(CoreError::AlreadyExists(pref.to_string()));
        }
    }

    // Realize the dependencies; the target is packaged below, not here.
    analysis.set_status(target, BinaryStatus::Skip);
    let installer = BinaryInstaller::new(
        cache.clone(),
        remotes.clone(),
        Arc::clone(package_method),
        false,
    );
    let dep_report = installer.install(&mut graph, &analysis, hooks).await?;
    if let Some(failed) = dep_report.failures().first() {
        return Err(CoreError::Build {
            reference: pref.to_string(),
            message: format!(
                "dependency '{}' could not be realized: export aborted",
                failed.reference
            ),
        });
    }

    let staged = cache.stage_dir()?;
    if let Some(folder) = &request.package_folder {
        copy_tree(folder, staged.path())?;
    } else {
        let dependencies = closure_paths(cache, &graph, target);
        let dest = staged.path().to_path_buf();
        let source_dir = request.source_folder.clone();
        let build_dir = request.build_folder.clone();
        let package_id = package_id.clone();
        let package_method = Arc::clone(package_method);
        let pref_display = pref.to_string();
        task::spawn_blocking(move || {
            let ctx = BuildContext {
                recipe: &recipe,
                package_id: &package_id,
                dependencies: &dependencies,
                options: &recipe.options,
                source_dir: source_dir.as_deref(),
                build_dir: build_dir.as_deref(),
                dest_dir: &dest,
            };
            package_method.run(&ctx)
        })
        .await
        .map_err(|e| CoreError::Build {
            reference: pref_display.clone(),
            message: format!("package worker panicked: {e}"),
        })?
        .map_err(|e| CoreError::Build {
            reference: pref_display,
            message: e.to_string(),
        })?;
    }

    let manifest = FileTreeManifest::create(staged.path())?;
    manifest.save(staged.path())?;
    let short_paths = graph
        .node(target)
        .recipe
        .as_ref()
        .is_some_and(|r| r.short_paths);
    cache.publish_package(&pref, short_paths, staged, request.force)?;

    let prev = manifest.summary();
    record_prev(cache, &pref, &prev)?;
    graph.node_mut(target).prev = Some(prev.clone());
    let lock = capture_lock(&graph);

    let package = pref.with_prev(prev);
    info!(reference = %package, "package exported");
    hooks.notify(&HookEvent::PostExportPkg {
        reference: &package,
    });
    Ok(ExportPkgResult { package, lock })
}

/// Paths of the target's realized public closure, closure order.
fn closure_paths(
    cache: &CacheLayout,
    graph: &DependencyGraph,
    target: crate::graph::NodeId,
) -> Vec<DependencyPath> {
    let node = graph.node(target);
    let mut paths = Vec::with_capacity(node.closure.len());
    for &dep_id in &node.closure {
        let dep = graph.node(dep_id);
        let (Some(dep_ref), Some(dep_pkg)) = (&dep.reference, &dep.package_id) else {
            continue;
        };
        let dep_short = dep.recipe.as_ref().is_some_and(|r| r.short_paths);
        let dep_pref = PackageReference::new(dep_ref.clone(), dep_pkg.clone());
        paths.push(DependencyPath {
            name: dep_ref.name.clone(),
            path: cache.package(&dep_pref, dep_short),
        });
    }
    paths
}

/// Copy a directory tree, preserving relative structure.
fn copy_tree(from: &Path, to: &Path) -> Result<(), CoreError> {
    for entry in walkdir::WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(|e| {
            CoreError::Configuration(format!("Cannot read package folder '{}': {e}", from.display()))
        })?;
        let rel = entry.path().strip_prefix(from).map_err(|_| {
            CoreError::Configuration(format!(
                "Entry '{}' escapes the package folder",
                entry.path().display()
            ))
        })?;
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
