//! Export-pkg command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use keel_core::{
    export_pkg as core_export_pkg, CacheLayout, ExportPkgRequest, GraphInfo, Hooks, NoBuild,
    PackageMethod,
};
use keel_schema::RecipeReference;

use crate::loader::TomlRecipeLoader;
use crate::remotes::load_remotes;
use crate::parse_pairs;

/// Flags of one export-pkg invocation.
#[derive(Debug)]
pub struct ExportPkgArgs {
    pub reference: String,
    pub package_folder: PathBuf,
    pub settings: Vec<String>,
    pub options: Vec<String>,
    pub lockfile_out: Option<PathBuf>,
    pub force: bool,
}

/// Register a pre-built artifact tree as a binary package.
pub async fn export_pkg(args: ExportPkgArgs) -> Result<()> {
    let cache = CacheLayout::default_home()?;
    let remotes = load_remotes(cache.root())?;
    let loader = TomlRecipeLoader::new(cache.clone());
    let hooks = Hooks::new();
    let package_method: Arc<dyn PackageMethod> = Arc::new(NoBuild);

    let reference: RecipeReference = args.reference.parse()?;
    let info = GraphInfo {
        settings: parse_pairs(&args.settings)?,
        options: parse_pairs(&args.options)?,
        lock: None,
    };
    let request = ExportPkgRequest {
        reference,
        package_folder: Some(args.package_folder),
        source_folder: None,
        build_folder: None,
        force: args.force,
    };

    let result = core_export_pkg(
        &cache,
        &loader,
        &package_method,
        &hooks,
        &info,
        &remotes,
        request,
    )
    .await?;

    println!("exported {}", result.package);
    if let Some(out) = &args.lockfile_out {
        result
            .lock
            .save(out)
            .with_context(|| format!("failed to write graph lock to '{}'", out.display()))?;
        println!("lock written to {}", out.display());
    }
    Ok(())
}
