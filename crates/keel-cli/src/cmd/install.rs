//! Install command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use keel_core::{
    capture_lock, BinaryAnalyzer, BinaryInstaller, BuildMode, CacheLayout, GraphInfo, GraphLock,
    GraphManager, Hooks, LoadOptions, NoBuild, NodeOutcome,
};

use crate::loader::TomlRecipeLoader;
use crate::remotes::load_remotes;
use crate::{cmd, parse_pairs};

/// Flags of one install invocation.
#[derive(Debug)]
pub struct InstallArgs {
    pub root: String,
    pub settings: Vec<String>,
    pub options: Vec<String>,
    pub build: Vec<String>,
    pub lockfile: Option<PathBuf>,
    pub lockfile_out: Option<PathBuf>,
    pub update: bool,
    pub check_updates: bool,
    pub force: bool,
}

/// Resolve, analyze, and realize the graph rooted at `args.root`.
pub async fn install(args: InstallArgs) -> Result<()> {
    let cache = CacheLayout::default_home()?;
    let remotes = load_remotes(cache.root())?;
    let loader = TomlRecipeLoader::new(cache.clone());
    let hooks = Hooks::new();

    let root = cmd::parse_root(&args.root)?;
    let lock = args
        .lockfile
        .as_deref()
        .map(GraphLock::load)
        .transpose()
        .context("failed to read graph lock")?;
    let info = GraphInfo {
        settings: parse_pairs(&args.settings)?,
        options: parse_pairs(&args.options)?,
        lock,
    };
    let opts = LoadOptions {
        build_mode: BuildMode::new(args.build.clone()),
        check_updates: args.check_updates,
        update: args.update,
    };

    let manager = GraphManager::new(&cache, &loader, &hooks);
    let mut graph = manager.load_graph(&root, &info, &opts, &remotes).await?;

    let analyzer = BinaryAnalyzer::new(&cache);
    let analysis = analyzer.evaluate(&mut graph, &info, &opts, &remotes).await?;

    let installer = BinaryInstaller::new(cache, remotes, Arc::new(NoBuild), args.force);
    let report = installer.install(&mut graph, &analysis, &hooks).await?;

    for node in report.nodes() {
        let verdict = match &node.outcome {
            NodeOutcome::Reused => "cache".to_string(),
            NodeOutcome::Downloaded { remote } => format!("download ({remote})"),
            NodeOutcome::Built => "build".to_string(),
            NodeOutcome::Skipped => "skip".to_string(),
            NodeOutcome::Failed { message } => format!("FAILED: {message}"),
            NodeOutcome::Cancelled { failed_dependency } => {
                format!("cancelled (dependency '{failed_dependency}' failed)")
            }
        };
        println!("{:<50} {verdict}", node.reference.to_string());
    }

    if let Some(out) = lock_output(&args) {
        write_lock(&graph, out)?;
    }

    if !report.is_success() {
        bail!("{} package(s) could not be installed", report.failures().len());
    }
    Ok(())
}

/// Where the updated lock goes: an explicit `--lockfile-out` wins, else
/// an input `--lockfile` is rewritten in place so its PREVs stay current.
fn lock_output(args: &InstallArgs) -> Option<&Path> {
    args.lockfile_out.as_deref().or(args.lockfile.as_deref())
}

fn write_lock(graph: &keel_core::DependencyGraph, out: &Path) -> Result<()> {
    let lock = capture_lock(graph);
    lock.save(out)
        .with_context(|| format!("failed to write graph lock to '{}'", out.display()))?;
    println!("lock written to {}", out.display());
    Ok(())
}
