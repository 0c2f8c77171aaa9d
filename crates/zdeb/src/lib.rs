//! zdeb - mirror upstream release bundles into a signed apt repository.
//!
//! # Overview
//!
//! A run mirrors the published repository into a local working directory,
//! compares it with what upstream offers, builds and signs the missing
//! `.deb` artifacts, regenerates the repository index when something
//! changed, and uploads whatever the store does not have yet.
//!
//! # Working directory
//!
//! ```text
//! <workdir>/
//! ├── repo/   # Flat repository: artifacts, index, install.sh, index.html
//! └── tmp/    # Per-build scratch directories
//! ```
#![allow(clippy::missing_errors_doc)]

pub mod cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use zdeb_schema::Arch;

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(name = "zdeb")]
#[command(author, version, about = "zdeb - mirror upstream releases into a signed apt repository")]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Mirror, build, index and publish
    Sync {
        /// Configuration file
        #[arg(long, env = "ZDEB_CONFIG", default_value = "zdeb.toml")]
        config: PathBuf,
        /// Do everything locally but upload nothing
        #[arg(long)]
        dry_run: bool,
        /// Concurrent fetches, builds and uploads (defaults to the configured value)
        #[arg(long, short = 'j')]
        parallel: Option<usize>,
        /// Only process these architectures (repeatable)
        #[arg(long = "arch")]
        architectures: Vec<Arch>,
    },
    /// Show which releases upstream offers and which are missing locally
    Plan {
        /// Configuration file
        #[arg(long, env = "ZDEB_CONFIG", default_value = "zdeb.toml")]
        config: PathBuf,
    },
    /// Regenerate repository metadata from the local working directory
    Index {
        /// Configuration file
        #[arg(long, env = "ZDEB_CONFIG", default_value = "zdeb.toml")]
        config: PathBuf,
    },
    /// Print the artifact file name for a release
    Name {
        /// Upstream version, e.g. 6.0.27
        version: String,
        /// Architecture (amd64 or i386)
        arch: Arch,
        /// Take the package name and patch table from this configuration
        #[arg(long)]
        config: Option<PathBuf>,
        /// Package name when no configuration is given
        #[arg(long, default_value = "zotero", conflicts_with = "config")]
        product: String,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
