//! `tephra-fuse`: merge partitioned particle subfiles.
//!
//! ```text
//! tephra-fuse (-g | -n) -l <subfile>[,<subfile>...] -f <config-file>
//! ```
//!
//! Exits 0 on success and 1 on any error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Parser};
use tracing_subscriber::EnvFilter;

use tephra_io::fuse::{fuse, FuseRequest};
use tephra_io::FusionTopology;

/// Merge partitioned particle subfiles into one artifact.
#[derive(Parser, Debug)]
#[command(name = "tephra-fuse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(group(ArgGroup::new("mode").required(true).args(["global", "node"])))]
struct Cli {
    /// Fuse every subfile of the step into the main artifact.
    #[arg(short = 'g', long)]
    global: bool,

    /// Fuse one node's subfiles into a node-level artifact.
    #[arg(short = 'n', long)]
    node: bool,

    /// Comma-separated subfile names (default: every subfile in the config).
    #[arg(short = 'l', long = "list", value_delimiter = ',')]
    subfiles: Vec<String>,

    /// Subfiling config file written alongside the step.
    #[arg(short = 'f', long = "config")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .try_init();

    let request = FuseRequest {
        topology: if cli.global {
            FusionTopology::Global
        } else {
            FusionTopology::NodeLocal
        },
        subfiles: cli.subfiles,
        config: cli.config,
    };

    match fuse(&request) {
        Ok(outcome) => {
            tracing::debug!(removed = outcome.removed.len(), "fusion complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("tephra-fuse: {e}");
            ExitCode::FAILURE
        }
    }
}
