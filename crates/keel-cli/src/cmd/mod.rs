//! Command implementations.

pub mod export;
pub mod export_pkg;
pub mod graph;
pub mod install;

use std::path::PathBuf;

use keel_core::RootInput;
use keel_schema::RecipeReference;

/// Interpret a root argument: an existing path wins, otherwise it must
/// parse as a reference.
pub fn parse_root(root: &str) -> anyhow::Result<RootInput> {
    let path = PathBuf::from(root);
    if path.exists() {
        return Ok(RootInput::Path(path));
    }
    let reference: RecipeReference = root.parse()?;
    Ok(RootInput::Reference(reference))
}
