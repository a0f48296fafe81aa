//! The package-method boundary.
//!
//! Building a binary is delegated to an external callback: the core
//! decides *when* a build runs and with which inputs, never *how* source
//! is compiled. The callback receives the node's recipe, its package
//! identity, the realized package folders of its public closure, and a
//! destination directory it must confine all writes to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::recipe::Recipe;
use keel_schema::Blake3Hash;

/// One realized dependency made available to a build.
#[derive(Debug, Clone)]
pub struct DependencyPath {
    /// Dependency package name.
    pub name: String,
    /// Root of its installed package folder.
    pub path: PathBuf,
}

/// Everything a package method receives for one build.
///
/// `dependencies` is aggregated from the node's public closure in closure
/// order: a dependency's entry always precedes entries of nodes depending
/// on it, so a consumer merging per-dependency information can let later
/// entries override earlier ones.
#[derive(Debug)]
pub struct BuildContext<'a> {
    /// The recipe being built.
    pub recipe: &'a Recipe,
    /// The node's computed package identity.
    pub package_id: &'a Blake3Hash,
    /// Realized package folders of the public closure, closure-ordered.
    pub dependencies: &'a [DependencyPath],
    /// Resolved option values, as they entered the identity.
    pub options: &'a BTreeMap<String, String>,
    /// Checked-out source tree, when the caller supplies one.
    pub source_dir: Option<&'a Path>,
    /// Intermediate build tree, when the caller supplies one.
    pub build_dir: Option<&'a Path>,
    /// Destination the produced artifact tree must be written to. All
    /// side effects must stay inside this directory.
    pub dest_dir: &'a Path,
}

/// External build/package callback.
///
/// Invoked only for nodes with Build status and during local export-pkg.
/// Runs on a blocking thread; implementations may do synchronous I/O and
/// spawn build processes.
pub trait PackageMethod: Send + Sync {
    /// Produce the artifact tree for one node into `ctx.dest_dir`.
    ///
    /// # Errors
    ///
    /// Any error fails the node; the installer converts it into a
    /// [`CoreError::Build`] carrying the node's reference.
    fn run(&self, ctx: &BuildContext<'_>) -> Result<(), CoreError>;
}

/// A package method that rejects every build. Used where a build must
/// not happen, e.g. installing a graph that is expected to be fully
/// cache- or remote-satisfiable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBuild;

impl PackageMethod for NoBuild {
    fn run(&self, ctx: &BuildContext<'_>) -> Result<(), CoreError> {
        Err(CoreError::Build {
            reference: ctx.recipe.name.clone(),
            message: "no package method provided for a node requiring a build".to_string(),
        })
    }
}
