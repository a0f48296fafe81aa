//! The recipe loader boundary.
//!
//! Recipes are dynamic build descriptions evaluated by an external engine;
//! the core only consumes the evaluated result: name, version, requirement
//! list, resolved options, settings sensitivity, and the short-paths flag.
//! [`RecipeLoader`] is that boundary. It must be deterministic for a given
//! (source, options, settings) input.

use std::collections::BTreeMap;
use std::path::PathBuf;

use keel_schema::{RecipeReference, Version};

use crate::error::CoreError;

/// An evaluated recipe, as handed over by the loader boundary.
#[derive(Debug, Clone)]
pub struct Recipe {
    /// Declared package name.
    pub name: String,
    /// Declared version.
    pub version: Version,
    /// Requirements, in declaration order.
    pub requires: Vec<Requirement>,
    /// Resolved option values for this evaluation (the binary-relevant
    /// options subset; these enter the package identity).
    pub options: BTreeMap<String, String>,
    /// Names of the settings this recipe is sensitive to. Only these keys
    /// of the profile settings enter the package identity.
    pub settings_keys: Vec<String>,
    /// Whether the package needs a shortened on-disk path layout.
    pub short_paths: bool,
}

impl Recipe {
    /// Minimal recipe with no requirements, options, or settings.
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: Version::new(version),
            requires: Vec::new(),
            options: BTreeMap::new(),
            settings_keys: Vec::new(),
            short_paths: false,
        }
    }
}

/// One requirement edge as declared by a recipe.
#[derive(Debug, Clone)]
pub struct Requirement {
    /// What is required: a pinned reference or a version range.
    pub target: RequirementTarget,
    /// Build-time requirement: expanded as a regular node but excluded
    /// from public closures and from the requester's package identity.
    pub build_time: bool,
    /// Private requirement: a real runtime dependency, but hidden from the
    /// requester's consumers (excluded from closures above it).
    pub private: bool,
    /// Downstream version overrides declared by this requirement's owner,
    /// keyed by package name. Applied to the whole subtree below it.
    pub overrides: BTreeMap<String, RecipeReference>,
}

impl Requirement {
    /// A plain runtime requirement on a pinned reference.
    pub fn pinned(reference: RecipeReference) -> Self {
        Self {
            target: RequirementTarget::Pinned(reference),
            build_time: false,
            private: false,
            overrides: BTreeMap::new(),
        }
    }

    /// A runtime requirement on a version range.
    pub fn range(name: &str, range: &str, user: &str, channel: &str) -> Self {
        Self {
            target: RequirementTarget::Range {
                name: name.to_string(),
                range: range.to_string(),
                user: user.to_string(),
                channel: channel.to_string(),
            },
            build_time: false,
            private: false,
            overrides: BTreeMap::new(),
        }
    }

    /// Mark as build-time.
    pub fn build_time(mut self) -> Self {
        self.build_time = true;
        self
    }

    /// Mark as private.
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    /// Attach a downstream override for `name`.
    pub fn with_override(mut self, name: &str, reference: RecipeReference) -> Self {
        self.overrides.insert(name.to_string(), reference);
        self
    }

    /// The package name this requirement targets.
    pub fn name(&self) -> &str {
        match &self.target {
            RequirementTarget::Pinned(r) => &r.name,
            RequirementTarget::Range { name, .. } => name,
        }
    }
}

/// Target of a requirement: a concrete reference or a range to resolve.
#[derive(Debug, Clone)]
pub enum RequirementTarget {
    /// A fully named reference (revision may still be unresolved).
    Pinned(RecipeReference),
    /// A version range to be resolved against cache and remotes.
    Range {
        /// Required package name.
        name: String,
        /// Semver range expression (e.g. `>=1.0, <2.0`).
        range: String,
        /// User namespace the candidates must match.
        user: String,
        /// Channel the candidates must match.
        channel: String,
    },
}

/// Where a recipe is loaded from.
#[derive(Debug, Clone)]
pub enum RecipeSource {
    /// A recipe file path (the user's working copy, used for root inputs).
    Path(PathBuf),
    /// A reference whose recipe content is in the cache export folder.
    Reference(RecipeReference),
}

impl std::fmt::Display for RecipeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipeSource::Path(p) => write!(f, "{}", p.display()),
            RecipeSource::Reference(r) => write!(f, "{r}"),
        }
    }
}

/// The external recipe evaluation boundary.
///
/// Implementations evaluate the recipe under the given profile options and
/// settings and return its declared shape. The core treats the result as
/// opaque and deterministic.
pub trait RecipeLoader: Send + Sync {
    /// Evaluate the recipe at `source`.
    ///
    /// # Errors
    ///
    /// `CoreError::Configuration` for malformed recipes,
    /// `CoreError::Resolution(NotFound)` when the source does not exist.
    fn load(
        &self,
        source: &RecipeSource,
        options: &BTreeMap<String, String>,
        settings: &BTreeMap<String, String>,
    ) -> Result<Recipe, CoreError>;
}
