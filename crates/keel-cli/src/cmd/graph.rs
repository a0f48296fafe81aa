//! Graph command: resolve and print, install nothing.

use anyhow::Result;

use keel_core::{
    BinaryAnalyzer, BinaryStatus, BuildMode, CacheLayout, GraphInfo, GraphManager, Hooks,
    LoadOptions,
};

use crate::loader::TomlRecipeLoader;
use crate::remotes::load_remotes;
use crate::{cmd, parse_pairs};

/// Flags of one graph invocation.
#[derive(Debug)]
pub struct GraphArgs {
    pub root: String,
    pub settings: Vec<String>,
    pub options: Vec<String>,
    pub build: Vec<String>,
}

/// Resolve the graph for `args.root` and print each node's reference,
/// identity, and binary status.
pub async fn graph(args: GraphArgs) -> Result<()> {
    let cache = CacheLayout::default_home()?;
    let remotes = load_remotes(cache.root())?;
    let loader = TomlRecipeLoader::new(cache.clone());
    let hooks = Hooks::new();

    let root = cmd::parse_root(&args.root)?;
    let info = GraphInfo {
        settings: parse_pairs(&args.settings)?,
        options: parse_pairs(&args.options)?,
        lock: None,
    };
    let opts = LoadOptions {
        build_mode: BuildMode::new(args.build),
        check_updates: false,
        update: false,
    };

    let manager = GraphManager::new(&cache, &loader, &hooks);
    let mut graph = manager.load_graph(&root, &info, &opts, &remotes).await?;
    let analysis = BinaryAnalyzer::new(&cache)
        .evaluate(&mut graph, &info, &opts, &remotes)
        .await?;

    for id in graph.topo_children_first() {
        let node = graph.node(id);
        let identity = node
            .package_id
            .as_ref()
            .map_or_else(|| "-".to_string(), |h| h.short().to_string());
        let status = match analysis.status(id) {
            Some(BinaryStatus::Cache) => "cache".to_string(),
            Some(BinaryStatus::Download { remote }) => format!("download ({remote})"),
            Some(BinaryStatus::Build { forced: true }) => "build (forced)".to_string(),
            Some(BinaryStatus::Build { forced: false }) => "build".to_string(),
            Some(BinaryStatus::Skip) | None => "skip".to_string(),
        };
        println!("{:<50} {identity:<14} {status}", node.display());
    }
    Ok(())
}
