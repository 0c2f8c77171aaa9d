//! Turning a staging tree into a `.deb`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::PackagerKind;
use crate::{deb, tool};

/// Fixed epoch for `SOURCE_DATE_EPOCH` so archive timestamps do not depend
/// on when the build ran.
const SOURCE_DATE_EPOCH: &str = "0";

/// Archive builder.
#[async_trait]
pub trait Packager: Send + Sync {
    /// Build `output` from `staging`, whose control files are in `DEBIAN/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be produced.
    async fn package(&self, staging: &Path, output: &Path) -> Result<()>;
}

/// Shells out to `dpkg-deb`.
#[derive(Debug, Clone)]
pub struct DpkgDeb {
    program: String,
    timeout: Duration,
}

impl DpkgDeb {
    /// Use the `dpkg-deb` found in `PATH`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "dpkg-deb".to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl Packager for DpkgDeb {
    async fn package(&self, staging: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--root-owner-group", "-Zgzip", "--build"])
            .arg(staging)
            .arg(output)
            .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH);
        tool::run(cmd, &self.program, None, self.timeout).await?;
        Ok(())
    }
}

/// Writes the archive in-process; needs no Debian tooling on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDeb;

#[async_trait]
impl Packager for NativeDeb {
    async fn package(&self, staging: &Path, output: &Path) -> Result<()> {
        let staging = staging.to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || deb::build_deb(&staging))
            .await
            .context("packaging task panicked")??;
        tokio::fs::write(output, bytes)
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;
        Ok(())
    }
}

/// Packager implementation selected by configuration.
pub fn for_kind(kind: PackagerKind, timeout: Duration) -> Arc<dyn Packager> {
    match kind {
        PackagerKind::DpkgDeb => Arc::new(DpkgDeb::new(timeout)),
        PackagerKind::Native => Arc::new(NativeDeb),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn native_packager_writes_readable_deb() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("stage");
        deb::write_control(
            &staging,
            &[
                ("Package", "zotero".to_string()),
                ("Version", "6.0.27".to_string()),
            ],
        )
        .unwrap();
        std::fs::create_dir_all(staging.join("usr/lib/zotero")).unwrap();
        std::fs::write(staging.join("usr/lib/zotero/zotero"), b"bin").unwrap();

        let output = dir.path().join("zotero_6.0.27_amd64.deb");
        NativeDeb.package(&staging, &output).await.unwrap();

        let bytes = std::fs::read(&output).unwrap();
        let control = deb::read_control(&bytes).unwrap();
        assert_eq!(deb::control_field(&control, "Version"), Some("6.0.27"));
    }
}
