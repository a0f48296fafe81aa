//! Shared fixtures: an in-memory recipe loader, an in-memory remote, and
//! a bench wiring them to a temporary cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use keel_core::{
    BinaryAnalysis, BinaryAnalyzer, BuildContext, CacheLayout, CoreError, DependencyGraph,
    GraphInfo, GraphManager, Hooks, LoadOptions, PackageMethod, Recipe, RecipeLoader,
    RecipeSource, Remote, RemoteFile, RemoteSet, ResolutionError, RootInput,
};
use keel_schema::{FileTreeManifest, PackageReference, RecipeReference};

/// Serves recipes from memory, keyed by name/version for reference
/// sources and by file stem (name only) for path sources.
#[derive(Default)]
pub struct MemoryLoader {
    recipes: Vec<Recipe>,
}

impl MemoryLoader {
    pub fn insert(&mut self, recipe: Recipe) {
        self.recipes
            .retain(|r| !(r.name == recipe.name && r.version == recipe.version));
        self.recipes.push(recipe);
    }
}

impl RecipeLoader for MemoryLoader {
    fn load(
        &self,
        source: &RecipeSource,
        _options: &BTreeMap<String, String>,
        _settings: &BTreeMap<String, String>,
    ) -> Result<Recipe, CoreError> {
        let found = match source {
            RecipeSource::Reference(reference) => self
                .recipes
                .iter()
                .find(|r| r.name == reference.name && r.version == reference.version),
            RecipeSource::Path(path) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.recipes.iter().find(|r| r.name == stem)
            }
        };
        found
            .cloned()
            .ok_or_else(|| ResolutionError::NotFound(source.to_string()).into())
    }
}

fn recipe_key(reference: &RecipeReference) -> String {
    reference.dir_repr()
}

fn package_key(reference: &PackageReference) -> String {
    format!(
        "{}:{}",
        reference.recipe.dir_repr(),
        reference.package_id.as_str()
    )
}

#[derive(Default)]
struct MemoryStore {
    recipes: HashMap<String, (Vec<RemoteFile>, FileTreeManifest)>,
    packages: HashMap<String, (Vec<RemoteFile>, FileTreeManifest)>,
}

/// An in-memory remote.
pub struct MemoryRemote {
    name: String,
    store: Mutex<MemoryStore>,
}

impl MemoryRemote {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            store: Mutex::new(MemoryStore::default()),
        }
    }

    /// Seed a recipe, as if previously uploaded.
    pub fn put_recipe(
        &self,
        reference: &RecipeReference,
        files: Vec<RemoteFile>,
        manifest: FileTreeManifest,
    ) {
        self.store
            .lock()
            .unwrap()
            .recipes
            .insert(recipe_key(reference), (files, manifest));
    }

    /// Seed a package directly, bypassing upload.
    pub fn put_package(
        &self,
        reference: &PackageReference,
        files: Vec<RemoteFile>,
        manifest: FileTreeManifest,
    ) {
        self.store
            .lock()
            .unwrap()
            .packages
            .insert(package_key(reference), (files, manifest));
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, name: &str) -> Result<Vec<RecipeReference>, CoreError> {
        let store = self.store.lock().unwrap();
        let mut found = Vec::new();
        for key in store.recipes.keys() {
            // dir_repr is name/version/user/channel.
            let mut parts = key.split('/');
            if parts.next() == Some(name) {
                if let (Some(version), Some(user), Some(channel)) =
                    (parts.next(), parts.next(), parts.next())
                {
                    found.push(RecipeReference::new(name, version, user, channel));
                }
            }
        }
        Ok(found)
    }

    async fn get_recipe(
        &self,
        reference: &RecipeReference,
    ) -> Result<(Vec<RemoteFile>, FileTreeManifest), CoreError> {
        self.store
            .lock()
            .unwrap()
            .recipes
            .get(&recipe_key(reference))
            .cloned()
            .ok_or_else(|| CoreError::remote(&self.name, format!("no recipe '{reference}'")))
    }

    async fn recipe_manifest(
        &self,
        reference: &RecipeReference,
    ) -> Result<Option<FileTreeManifest>, CoreError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .recipes
            .get(&recipe_key(reference))
            .map(|(_, m)| m.clone()))
    }

    async fn package_manifest(
        &self,
        reference: &PackageReference,
    ) -> Result<Option<FileTreeManifest>, CoreError> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .packages
            .get(&package_key(reference))
            .map(|(_, m)| m.clone()))
    }

    async fn get_package(
        &self,
        reference: &PackageReference,
    ) -> Result<(Vec<RemoteFile>, FileTreeManifest), CoreError> {
        self.store
            .lock()
            .unwrap()
            .packages
            .get(&package_key(reference))
            .cloned()
            .ok_or_else(|| CoreError::remote(&self.name, format!("no package '{reference}'")))
    }

    async fn upload_package(
        &self,
        reference: &PackageReference,
        files: Vec<RemoteFile>,
        manifest: FileTreeManifest,
    ) -> Result<(), CoreError> {
        self.store
            .lock()
            .unwrap()
            .packages
            .insert(package_key(reference), (files, manifest));
        Ok(())
    }
}

/// All regular files under `dir` except the manifest, as remote files.
pub fn dir_files(dir: &std::path::Path) -> Vec<RemoteFile> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if rel == keel_schema::manifest::MANIFEST_FILE {
            continue;
        }
        files.push((rel, std::fs::read(entry.path()).unwrap()));
    }
    files
}

/// A package method that writes one marker file naming the recipe and
/// its visible dependencies.
pub struct TouchBuild;

impl PackageMethod for TouchBuild {
    fn run(&self, ctx: &BuildContext<'_>) -> Result<(), CoreError> {
        let deps: Vec<&str> = ctx.dependencies.iter().map(|d| d.name.as_str()).collect();
        let content = format!("{} deps={}", ctx.recipe.name, deps.join(","));
        std::fs::write(ctx.dest_dir.join("artifact.txt"), content)?;
        Ok(())
    }
}

/// Like [`TouchBuild`], but fails for one named recipe.
pub struct FailBuild(pub String);

impl PackageMethod for FailBuild {
    fn run(&self, ctx: &BuildContext<'_>) -> Result<(), CoreError> {
        if ctx.recipe.name == self.0 {
            return Err(CoreError::Build {
                reference: ctx.recipe.name.clone(),
                message: "simulated build failure".to_string(),
            });
        }
        TouchBuild.run(ctx)
    }
}

/// A temporary cache plus loader, remotes, and hooks, wired together.
pub struct Bench {
    _tmp: tempfile::TempDir,
    pub cache: CacheLayout,
    pub loader: MemoryLoader,
    pub remotes: RemoteSet,
    pub hooks: Hooks,
}

impl Bench {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheLayout::new(tmp.path()).unwrap();
        Self {
            _tmp: tmp,
            cache,
            loader: MemoryLoader::default(),
            remotes: RemoteSet::new(),
            hooks: Hooks::new(),
        }
    }

    /// Register a recipe with the loader and export it into the cache
    /// under `core/stable`. Returns the unpinned reference.
    pub fn add_recipe(&mut self, recipe: Recipe) -> RecipeReference {
        self.add_recipe_with_content(recipe, "")
    }

    /// Same as [`Bench::add_recipe`] with extra export content, so tests
    /// can force distinct recipe revisions for the same declaration.
    pub fn add_recipe_with_content(&mut self, recipe: Recipe, extra: &str) -> RecipeReference {
        let reference =
            RecipeReference::new(&recipe.name, recipe.version.as_str(), "core", "stable");
        let body = format!("{}/{} {extra}", recipe.name, recipe.version.as_str());
        self.cache
            .export_recipe(&reference, &[("keel.toml".to_string(), body.into_bytes())])
            .unwrap();
        self.loader.insert(recipe);
        reference
    }

    pub async fn load(
        &self,
        root: &RootInput,
        info: &GraphInfo,
        opts: &LoadOptions,
    ) -> Result<DependencyGraph, CoreError> {
        let manager = GraphManager::new(&self.cache, &self.loader, &self.hooks);
        manager.load_graph(root, info, opts, &self.remotes).await
    }

    pub async fn analyze(
        &self,
        graph: &mut DependencyGraph,
        info: &GraphInfo,
        opts: &LoadOptions,
    ) -> Result<BinaryAnalysis, CoreError> {
        BinaryAnalyzer::new(&self.cache)
            .evaluate(graph, info, opts, &self.remotes)
            .await
    }
}
