//! keel - binary package dependency manager.
//!
//! Thin command-line surface over `keel-core`: resolves dependency
//! graphs, installs binaries, and registers locally built artifacts.
//! Recipes are TOML files; remotes are directory-backed stores declared
//! in `$KEEL_HOME/remotes.toml`.

pub mod cmd;
pub mod loader;
pub mod remotes;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "keel")]
#[command(author, version, about = "keel - binary package dependency manager")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve a dependency graph and realize every binary
    Install {
        /// Root recipe: a path to a recipe file, or a reference like
        /// `zlib/1.2.11@core/stable`
        root: String,

        /// Profile setting, `key=value`; repeatable
        #[arg(short = 's', long = "setting")]
        settings: Vec<String>,

        /// Option value, `key=value`; repeatable
        #[arg(short = 'o', long = "option")]
        options: Vec<String>,

        /// Force local builds for matching names; repeatable, `*` globs
        #[arg(long = "build")]
        build: Vec<String>,

        /// Graph lock to resolve against
        #[arg(long)]
        lockfile: Option<PathBuf>,

        /// Where to write the updated graph lock
        #[arg(long)]
        lockfile_out: Option<PathBuf>,

        /// Prefer newer remote recipe revisions over cached ones
        #[arg(long)]
        update: bool,

        /// Warn when cached binaries are older than remote ones
        #[arg(long)]
        check_updates: bool,

        /// Allow forced builds to replace existing package folders
        #[arg(long)]
        force: bool,
    },

    /// Copy a recipe into the cache and pin its revision
    Export {
        /// Path to a recipe file or its directory
        path: PathBuf,

        /// User namespace to export under
        #[arg(long, default_value = "_")]
        user: String,

        /// Channel to export under
        #[arg(long, default_value = "_")]
        channel: String,
    },

    /// Register a locally built artifact tree as a binary package
    ExportPkg {
        /// Target reference; its recipe must already be exported
        reference: String,

        /// Pre-built artifact tree to register
        #[arg(long)]
        package_folder: PathBuf,

        /// Profile setting, `key=value`; repeatable
        #[arg(short = 's', long = "setting")]
        settings: Vec<String>,

        /// Option value, `key=value`; repeatable
        #[arg(short = 'o', long = "option")]
        options: Vec<String>,

        /// Where to write the graph lock of this export
        #[arg(long)]
        lockfile_out: Option<PathBuf>,

        /// Replace an existing package folder
        #[arg(long)]
        force: bool,
    },

    /// Resolve and print a dependency graph without installing
    Graph {
        /// Root recipe: a path or a reference
        root: String,

        /// Profile setting, `key=value`; repeatable
        #[arg(short = 's', long = "setting")]
        settings: Vec<String>,

        /// Option value, `key=value`; repeatable
        #[arg(short = 'o', long = "option")]
        options: Vec<String>,

        /// Force local builds for matching names; repeatable
        #[arg(long = "build")]
        build: Vec<String>,
    },
}

/// Parse repeated `key=value` flags into a map.
pub fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected key=value, got '{pair}'");
        };
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}
