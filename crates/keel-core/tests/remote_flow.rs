//! Recipe and binary transfer through the remote boundary.

mod common;

use std::sync::Arc;

use common::{dir_files, Bench, MemoryRemote, TouchBuild};
use keel_core::{
    BinaryInstaller, BinaryStatus, GraphInfo, LoadOptions, NoBuild, NodeOutcome, Recipe, Remote,
    RootInput,
};
use keel_schema::{FileTreeManifest, PackageReference, RecipeReference};

/// Build zlib in a producer bench and mirror its recipe and binary onto
/// an in-memory remote, as an upload would.
async fn seed_remote(remote: &MemoryRemote) -> RecipeReference {
    let mut producer = Bench::new();
    let reference = producer.add_recipe(Recipe::new("zlib", "1.0"));

    let info = GraphInfo::default();
    let opts = LoadOptions::default();
    let mut graph = producer
        .load(&RootInput::Reference(reference.clone()), &info, &opts)
        .await
        .unwrap();
    let analysis = producer.analyze(&mut graph, &info, &opts).await.unwrap();
    let report = BinaryInstaller::new(
        producer.cache.clone(),
        producer.remotes.clone(),
        Arc::new(TouchBuild),
        false,
    )
    .install(&mut graph, &analysis, &producer.hooks)
    .await
    .unwrap();
    assert!(report.is_success());

    let node = graph.node(graph.find_by_name("zlib").unwrap());
    let resolved = node.reference.clone().unwrap();
    let pref = PackageReference::new(resolved.clone(), node.package_id.clone().unwrap());

    let export_dir = producer.cache.export(&resolved);
    remote.put_recipe(
        &resolved,
        dir_files(&export_dir),
        FileTreeManifest::load(&export_dir).unwrap(),
    );
    let package_dir = producer.cache.package(&pref, false);
    remote.put_package(
        &pref,
        dir_files(&package_dir),
        FileTreeManifest::load(&package_dir).unwrap(),
    );
    resolved
}

#[tokio::test]
async fn recipe_and_binary_come_down_from_the_remote() {
    let remote = Arc::new(MemoryRemote::new("mem"));
    let produced = seed_remote(&remote).await;

    // Consumer: empty cache, same recipe declaration, remote configured.
    let mut consumer = Bench::new();
    consumer.loader.insert(Recipe::new("zlib", "1.0"));
    consumer.remotes.add(remote);

    let root = RootInput::Reference(produced.clone().without_revision());
    let info = GraphInfo::default();
    let opts = LoadOptions::default();
    let mut graph = consumer.load(&root, &info, &opts).await.unwrap();

    // The recipe was fetched and pinned to the producer's revision.
    let node = graph.node(graph.find_by_name("zlib").unwrap());
    assert_eq!(node.reference.clone().unwrap().revision, produced.revision);

    let analysis = consumer.analyze(&mut graph, &info, &opts).await.unwrap();
    let id = graph.find_by_name("zlib").unwrap();
    assert_eq!(
        analysis.status(id),
        Some(&BinaryStatus::Download {
            remote: "mem".to_string()
        })
    );

    let report = BinaryInstaller::new(
        consumer.cache.clone(),
        consumer.remotes.clone(),
        Arc::new(NoBuild),
        false,
    )
    .install(&mut graph, &analysis, &consumer.hooks)
    .await
    .unwrap();
    assert!(report.is_success());
    assert_eq!(
        report.outcome_of("zlib"),
        Some(&NodeOutcome::Downloaded {
            remote: "mem".to_string()
        })
    );

    let node = graph.node(graph.find_by_name("zlib").unwrap());
    let pref = PackageReference::new(
        node.reference.clone().unwrap(),
        node.package_id.clone().unwrap(),
    );
    assert!(consumer.cache.has_package(&pref, false));
}

#[tokio::test]
async fn traversing_download_paths_never_touch_the_filesystem() {
    let remote = Arc::new(MemoryRemote::new("mem"));
    let produced = seed_remote(&remote).await;

    let mut consumer = Bench::new();
    consumer.loader.insert(Recipe::new("zlib", "1.0"));
    consumer.remotes.add(remote.clone());

    let root = RootInput::Reference(produced.without_revision());
    let info = GraphInfo::default();
    let opts = LoadOptions::default();
    let mut graph = consumer.load(&root, &info, &opts).await.unwrap();
    let analysis = consumer.analyze(&mut graph, &info, &opts).await.unwrap();

    // A hostile payload tries to climb out of the staging directory.
    let node = graph.node(graph.find_by_name("zlib").unwrap());
    let pref = PackageReference::new(
        node.reference.clone().unwrap(),
        node.package_id.clone().unwrap(),
    );
    let (_, manifest) = remote.get_package(&pref).await.unwrap();
    remote.put_package(
        &pref,
        vec![("../../escape.txt".to_string(), b"owned".to_vec())],
        manifest,
    );

    let report = BinaryInstaller::new(
        consumer.cache.clone(),
        consumer.remotes.clone(),
        Arc::new(NoBuild),
        false,
    )
    .install(&mut graph, &analysis, &consumer.hooks)
    .await
    .unwrap();

    assert!(!report.is_success());
    match &report.failures()[0].outcome {
        NodeOutcome::Failed { message } => assert!(message.contains("escape.txt")),
        other => panic!("expected a rejected payload, got {other:?}"),
    }
    // The climb would have landed at the cache root; nothing was written
    // there or published.
    assert!(!consumer.cache.root().join("escape.txt").exists());
    assert!(!consumer.cache.has_package(&pref, false));
}

#[tokio::test]
async fn corrupted_download_fails_the_integrity_check() {
    let remote = Arc::new(MemoryRemote::new("mem"));
    let produced = seed_remote(&remote).await;

    let mut consumer = Bench::new();
    consumer.loader.insert(Recipe::new("zlib", "1.0"));
    consumer.remotes.add(remote.clone());

    let root = RootInput::Reference(produced.without_revision());
    let info = GraphInfo::default();
    let opts = LoadOptions::default();
    let mut graph = consumer.load(&root, &info, &opts).await.unwrap();
    let analysis = consumer.analyze(&mut graph, &info, &opts).await.unwrap();

    // Tamper with the package content after the manifest was taken.
    let node = graph.node(graph.find_by_name("zlib").unwrap());
    let pref = PackageReference::new(
        node.reference.clone().unwrap(),
        node.package_id.clone().unwrap(),
    );
    let (_, manifest) = remote.get_package(&pref).await.unwrap();
    remote.put_package(
        &pref,
        vec![("artifact.txt".to_string(), b"tampered".to_vec())],
        manifest,
    );

    let report = BinaryInstaller::new(
        consumer.cache.clone(),
        consumer.remotes.clone(),
        Arc::new(NoBuild),
        false,
    )
    .install(&mut graph, &analysis, &consumer.hooks)
    .await
    .unwrap();

    assert!(!report.is_success());
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    match &failures[0].outcome {
        NodeOutcome::Failed { message } => assert!(message.contains("Integrity")),
        other => panic!("expected integrity failure, got {other:?}"),
    }
    // Nothing was published into the cache.
    assert!(!consumer.cache.has_package(&pref, false));
}
