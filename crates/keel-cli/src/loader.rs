//! TOML recipe loading.
//!
//! A recipe is a `keel.toml` file declaring the package's name, version,
//! requirements, default option values, and the settings it is sensitive
//! to. Evaluation is static: profile options override the declared
//! defaults, key by key, for declared keys only.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use keel_core::{
    CacheLayout, CoreError, Recipe, RecipeLoader, RecipeSource, Requirement, RequirementTarget,
    ResolutionError,
};
use keel_schema::{RecipeReference, Version};

/// File name of a recipe inside a directory or cache export folder.
pub const RECIPE_FILE: &str = "keel.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecipeFile {
    name: String,
    version: String,
    #[serde(default)]
    settings: Vec<String>,
    #[serde(default, rename = "short-paths")]
    short_paths: bool,
    #[serde(default)]
    options: BTreeMap<String, String>,
    #[serde(default)]
    requires: Vec<RequireEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequireEntry {
    /// Pinned form: a full reference string.
    #[serde(rename = "ref")]
    reference: Option<String>,
    /// Range form: name plus a semver range.
    name: Option<String>,
    range: Option<String>,
    #[serde(default = "default_namespace")]
    user: String,
    #[serde(default = "default_namespace")]
    channel: String,
    #[serde(default)]
    build: bool,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    overrides: BTreeMap<String, String>,
}

fn default_namespace() -> String {
    "_".to_string()
}

/// Loads `keel.toml` recipes from paths and cache export folders.
#[derive(Debug)]
pub struct TomlRecipeLoader {
    cache: CacheLayout,
}

impl TomlRecipeLoader {
    /// Create a loader resolving reference sources through `cache`.
    pub fn new(cache: CacheLayout) -> Self {
        Self { cache }
    }

    fn parse(path: &Path, options: &BTreeMap<String, String>) -> Result<Recipe, CoreError> {
        if !path.exists() {
            return Err(ResolutionError::NotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path)?;
        let file: RecipeFile = toml::from_str(&content).map_err(|e| {
            CoreError::Configuration(format!("Malformed recipe '{}': {e}", path.display()))
        })?;

        let mut requires = Vec::with_capacity(file.requires.len());
        for entry in file.requires {
            requires.push(entry.into_requirement(path)?);
        }

        // Profile options override declared defaults for declared keys.
        let mut resolved_options = file.options;
        for (key, value) in options {
            if let Some(slot) = resolved_options.get_mut(key) {
                value.clone_into(slot);
            }
        }

        Ok(Recipe {
            name: file.name,
            version: Version::new(&file.version),
            requires,
            options: resolved_options,
            settings_keys: file.settings,
            short_paths: file.short_paths,
        })
    }
}

impl RequireEntry {
    fn into_requirement(self, path: &Path) -> Result<Requirement, CoreError> {
        let target = match (self.reference, self.name, self.range) {
            (Some(reference), None, None) => {
                RequirementTarget::Pinned(reference.parse::<RecipeReference>()?)
            }
            (None, Some(name), Some(range)) => RequirementTarget::Range {
                name,
                range,
                user: self.user,
                channel: self.channel,
            },
            _ => {
                return Err(CoreError::Configuration(format!(
                    "Requirement in '{}' must set either 'ref' or 'name' + 'range'",
                    path.display()
                )))
            }
        };
        let mut overrides = BTreeMap::new();
        for (name, reference) in self.overrides {
            overrides.insert(name, reference.parse::<RecipeReference>()?);
        }
        Ok(Requirement {
            target,
            build_time: self.build,
            private: self.private,
            overrides,
        })
    }
}

impl RecipeLoader for TomlRecipeLoader {
    fn load(
        &self,
        source: &RecipeSource,
        options: &BTreeMap<String, String>,
        _settings: &BTreeMap<String, String>,
    ) -> Result<Recipe, CoreError> {
        let path = match source {
            RecipeSource::Path(path) => {
                if path.is_dir() {
                    path.join(RECIPE_FILE)
                } else {
                    path.clone()
                }
            }
            RecipeSource::Reference(reference) => self.cache.export(reference).join(RECIPE_FILE),
        };
        Self::parse(&path, options)
    }
}
