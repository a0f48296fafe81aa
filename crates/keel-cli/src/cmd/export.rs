//! Export command: copy a recipe into the cache and pin its revision.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use keel_core::{CacheLayout, RecipeLoader, RecipeSource};
use keel_schema::RecipeReference;

use crate::loader::{TomlRecipeLoader, RECIPE_FILE};

/// Export the recipe at `path` into the cache under `user/channel`.
///
/// Every file in the recipe's directory becomes part of the export; the
/// recipe revision is the manifest summary of that tree.
pub async fn export(path: PathBuf, user: String, channel: String) -> Result<()> {
    let cache = CacheLayout::default_home()?;
    let loader = TomlRecipeLoader::new(cache.clone());

    let recipe_dir = if path.is_dir() {
        path.clone()
    } else {
        path.parent()
            .map(Path::to_path_buf)
            .context("recipe file has no parent directory")?
    };
    let recipe = loader.load(
        &RecipeSource::Path(path),
        &std::collections::BTreeMap::new(),
        &std::collections::BTreeMap::new(),
    )?;

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(&recipe_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&recipe_dir)
            .map_err(|_| anyhow::anyhow!("entry escapes the recipe directory"))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((rel, std::fs::read(entry.path())?));
    }
    if !files.iter().any(|(rel, _)| rel == RECIPE_FILE) {
        bail!("recipe directory has no {RECIPE_FILE}");
    }

    let reference = RecipeReference::new(&recipe.name, recipe.version.as_str(), &user, &channel);
    let revision = cache.export_recipe(&reference, &files)?;
    println!("exported {}", reference.with_revision(revision));
    Ok(())
}
