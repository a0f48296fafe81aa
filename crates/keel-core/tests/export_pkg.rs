//! Registering locally built artifacts.

mod common;

use std::sync::Arc;

use common::{Bench, TouchBuild};
use keel_core::{
    export_pkg, CoreError, ExportPkgRequest, GraphInfo, PackageMethod, Recipe, Requirement,
    ResolutionError,
};
use keel_schema::{FileTreeManifest, RecipeReference};

fn prebuilt_tree(dir: &std::path::Path) {
    std::fs::create_dir_all(dir.join("lib")).unwrap();
    std::fs::write(dir.join("lib/libapp.a"), b"object code").unwrap();
    std::fs::write(dir.join("readme.txt"), b"locally built").unwrap();
}

#[tokio::test]
async fn prebuilt_folder_becomes_a_package() {
    let mut bench = Bench::new();
    bench.add_recipe(Recipe::new("zlib", "1.0"));
    let mut app = Recipe::new("app", "1.0");
    app.requires = vec![Requirement::pinned(RecipeReference::new(
        "zlib", "1.0", "core", "stable",
    ))];
    let reference = bench.add_recipe(app);

    let artifacts = tempfile::tempdir().unwrap();
    prebuilt_tree(artifacts.path());

    let method: Arc<dyn PackageMethod> = Arc::new(TouchBuild);
    let request = ExportPkgRequest {
        reference: reference.clone(),
        package_folder: Some(artifacts.path().to_path_buf()),
        source_folder: None,
        build_folder: None,
        force: false,
    };
    let result = export_pkg(
        &bench.cache,
        &bench.loader,
        &method,
        &bench.hooks,
        &GraphInfo::default(),
        &bench.remotes,
        request.clone(),
    )
    .await
    .unwrap();

    // The registered folder carries the copied tree and its manifest,
    // and the PREV is that tree's summary.
    let package_dir = bench.cache.package(&result.package, false);
    assert!(package_dir.join("lib/libapp.a").exists());
    let manifest = FileTreeManifest::load(&package_dir).unwrap();
    assert_eq!(result.package.prev, Some(manifest.summary()));

    // The lock pins the export, PREV included.
    assert_eq!(result.lock.prev("app"), result.package.prev.as_ref());

    // Metadata records the PREV under the package identity.
    let metadata = bench.cache.metadata(&result.package.recipe).unwrap();
    assert_eq!(
        metadata
            .packages
            .get(result.package.package_id.as_str())
            .map(|r| &r.prev),
        result.package.prev.as_ref()
    );

    // Exporting again without force is fatal; with force it succeeds.
    let again = export_pkg(
        &bench.cache,
        &bench.loader,
        &method,
        &bench.hooks,
        &GraphInfo::default(),
        &bench.remotes,
        request.clone(),
    )
    .await;
    assert!(matches!(again, Err(CoreError::AlreadyExists(_))));

    let forced = export_pkg(
        &bench.cache,
        &bench.loader,
        &method,
        &bench.hooks,
        &GraphInfo::default(),
        &bench.remotes,
        ExportPkgRequest {
            force: true,
            ..request
        },
    )
    .await
    .unwrap();
    assert_eq!(forced.package.package_id, result.package.package_id);
}

#[tokio::test]
async fn unknown_recipe_is_rejected() {
    let bench = Bench::new();
    let method: Arc<dyn PackageMethod> = Arc::new(TouchBuild);

    let err = export_pkg(
        &bench.cache,
        &bench.loader,
        &method,
        &bench.hooks,
        &GraphInfo::default(),
        &bench.remotes,
        ExportPkgRequest {
            reference: RecipeReference::new("ghost", "1.0", "core", "stable"),
            package_folder: None,
            source_folder: None,
            build_folder: None,
            force: false,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Resolution(ResolutionError::NotFound(_))
    ));
}

#[tokio::test]
async fn package_method_produces_the_tree_when_no_folder_is_given() {
    let mut bench = Bench::new();
    let reference = bench.add_recipe(Recipe::new("app", "1.0"));

    let method: Arc<dyn PackageMethod> = Arc::new(TouchBuild);
    let result = export_pkg(
        &bench.cache,
        &bench.loader,
        &method,
        &bench.hooks,
        &GraphInfo::default(),
        &bench.remotes,
        ExportPkgRequest {
            reference,
            package_folder: None,
            source_folder: None,
            build_folder: None,
            force: false,
        },
    )
    .await
    .unwrap();

    let package_dir = bench.cache.package(&result.package, false);
    assert!(package_dir.join("artifact.txt").exists());
}
