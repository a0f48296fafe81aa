//! keel - binary package dependency manager CLI.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use keel_cli::cmd;
use keel_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Install {
            root,
            settings,
            options,
            build,
            lockfile,
            lockfile_out,
            update,
            check_updates,
            force,
        } => {
            cmd::install::install(cmd::install::InstallArgs {
                root,
                settings,
                options,
                build,
                lockfile,
                lockfile_out,
                update,
                check_updates,
                force,
            })
            .await
        }
        Commands::Export {
            path,
            user,
            channel,
        } => cmd::export::export(path, user, channel).await,
        Commands::ExportPkg {
            reference,
            package_folder,
            settings,
            options,
            lockfile_out,
            force,
        } => {
            cmd::export_pkg::export_pkg(cmd::export_pkg::ExportPkgArgs {
                reference,
                package_folder,
                settings,
                options,
                lockfile_out,
                force,
            })
            .await
        }
        Commands::Graph {
            root,
            settings,
            options,
            build,
        } => {
            cmd::graph::graph(cmd::graph::GraphArgs {
                root,
                settings,
                options,
                build,
            })
            .await
        }
    }
}
