//! zdeb - mirror upstream releases into a signed apt repository

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zdeb::cmd;
use zdeb::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            config,
            dry_run,
            parallel,
            architectures,
        } => cmd::sync::sync(&config, dry_run, parallel, architectures).await,
        Commands::Plan { config } => cmd::plan::plan(&config).await,
        Commands::Index { config } => cmd::index::index(&config).await,
        Commands::Name {
            version,
            arch,
            config,
            product,
        } => cmd::name::name(&version, arch, config.as_deref(), &product),
        Commands::Completions { shell } => {
            cmd::completions::completions(shell, &mut std::io::stdout());
            Ok(())
        }
    }
}
