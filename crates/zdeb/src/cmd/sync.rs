//! Sync command

use std::path::Path;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use zdeb_schema::Arch;

/// Run the full pipeline once.
///
/// Ctrl-C stops the run before any metadata is generated; builds in flight
/// are abandoned and their scratch directories removed.
pub async fn sync(
    config: &Path,
    dry_run: bool,
    parallel: Option<usize>,
    architectures: Vec<Arch>,
) -> Result<()> {
    let config = super::load_config(config)?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping before metadata");
            token.cancel();
        }
    });

    let mut synchronizer = super::synchronizer(&config)?
        .dry_run(dry_run)
        .cancellation(cancel);
    if let Some(parallel) = parallel {
        synchronizer = synchronizer.parallel(parallel);
    }
    if !architectures.is_empty() {
        synchronizer = synchronizer.architectures(architectures);
    }

    let report = synchronizer.run().await?;
    if report.dry_run {
        println!("dry run: {} objects not uploaded", report.uploaded.len());
    }
    Ok(())
}
