//! Subcommand implementations

pub mod completions;
pub mod index;
pub mod name;
pub mod plan;
pub mod sync;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use zdeb_core::builder::ArtifactBuilder;
use zdeb_core::catalog::ManifestCatalog;
use zdeb_core::config::process_env;
use zdeb_core::deps::{AptCache, DependencySource};
use zdeb_core::signer::{GpgSigner, Signer};
use zdeb_core::{Config, ConsoleReporter, SyncComponents, Synchronizer, packager, store};

/// Upper bound for one `dpkg-deb` or `apt-cache` invocation.
const TOOL_TIMEOUT: Duration = Duration::from_secs(600);

/// Load the configuration file, with environment overrides applied.
pub(crate) fn load_config(path: &Path) -> Result<Config> {
    Config::load(path, &process_env).with_context(|| format!("loading {}", path.display()))
}

/// Wire the production capabilities into a synchronizer.
pub(crate) fn synchronizer(config: &Config) -> Result<Synchronizer> {
    let client = reqwest::Client::builder()
        .user_agent(zdeb_core::USER_AGENT)
        .build()?;

    let signer: Arc<dyn Signer> = Arc::new(GpgSigner::new(config.signing.clone()));
    let deps: Arc<dyn DependencySource> = Arc::new(AptCache::new(TOOL_TIMEOUT));
    let builder = ArtifactBuilder::new(
        config,
        client.clone(),
        packager::for_kind(config.build.packager, TOOL_TIMEOUT),
        Arc::clone(&signer),
        deps,
    );
    let catalog = ManifestCatalog::new(client, config.upstream.manifest_url.clone(), config.retry);

    Ok(Synchronizer::new(
        config,
        SyncComponents {
            catalog: Arc::new(catalog),
            store: store::open(&config.store)?,
            builder: Arc::new(builder),
            signer,
            reporter: Arc::new(ConsoleReporter),
        },
    ))
}
