//! Dependency resolution and binary installation engine.
//!
//! The core turns a root recipe into a resolved dependency graph, assigns
//! every node a deterministic package identity, classifies how each binary
//! will be obtained, and realizes them concurrently in dependency order.
//! Recipe evaluation, remote transport, and artifact production are
//! external boundaries ([`RecipeLoader`], [`Remote`], [`PackageMethod`]);
//! everything in between is owned here.

pub mod binaries;
pub mod build;
pub mod cache;
pub mod error;
pub mod export;
pub mod graph;
pub mod hooks;
pub mod installer;
pub mod lockfile;
pub mod manager;
pub mod recipe;
pub mod remote;
pub mod resolver;

pub use binaries::{BinaryAnalysis, BinaryAnalyzer, BinaryStatus};
pub use build::{BuildContext, DependencyPath, NoBuild, PackageMethod};
pub use cache::{CacheLayout, PackageRecord, RefMetadata};
pub use error::{CoreError, ResolutionError};
pub use export::{export_pkg, ExportPkgRequest, ExportPkgResult};
pub use graph::{DependencyGraph, Edge, EdgeKind, Node, NodeId};
pub use hooks::{HookEvent, Hooks};
pub use installer::{BinaryInstaller, InstallReport, NodeOutcome, NodeReport};
pub use lockfile::{GraphLock, LockedNode};
pub use manager::{capture_lock, BuildMode, GraphInfo, GraphManager, LoadOptions, RootInput};
pub use recipe::{Recipe, RecipeLoader, RecipeSource, Requirement, RequirementTarget};
pub use remote::{Remote, RemoteFile, RemoteSet};
pub use resolver::RangeResolver;
