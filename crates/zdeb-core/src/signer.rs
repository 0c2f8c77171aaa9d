//! Package and repository signing.

use std::path::Path;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SigningConfig;
use crate::tool;

/// Signing capability backed by a configured key identity.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Embed a signature in the `.deb` at `deb`.
    async fn sign_package(&self, deb: &Path) -> Result<()>;

    /// Armored detached signature of `data` (`Release.gpg`).
    async fn detach_sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Clear-signed copy of `data` (`InRelease`).
    async fn clearsign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Armored public key matching the signing identity.
    async fn export_public_key(&self) -> Result<Vec<u8>>;
}

/// Signs with `gpg`, and packages with `dpkg-sig`.
#[derive(Debug, Clone)]
pub struct GpgSigner {
    config: SigningConfig,
}

impl GpgSigner {
    /// Create a signer for the configured key.
    pub fn new(config: SigningConfig) -> Self {
        Self { config }
    }

    fn gpg(&self) -> Command {
        let mut cmd = Command::new(&self.config.gpg);
        if let Some(home) = &self.config.gpg_home {
            cmd.arg("--homedir").arg(home);
        }
        cmd.args(["--batch", "--yes", "--armor"]);
        cmd
    }
}

#[async_trait]
impl Signer for GpgSigner {
    async fn sign_package(&self, deb: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.config.dpkg_sig);
        cmd.args(["-k", self.config.key.as_str(), "--sign", "builder"]).arg(deb);
        if let Some(home) = &self.config.gpg_home {
            cmd.env("GNUPGHOME", home);
        }
        tool::run(cmd, &self.config.dpkg_sig, None, self.config.timeout).await?;
        Ok(())
    }

    async fn detach_sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut cmd = self.gpg();
        cmd.args(["--local-user", self.config.key.as_str(), "--detach-sign", "--output", "-"]);
        tool::run(cmd, &self.config.gpg, Some(data), self.config.timeout).await
    }

    async fn clearsign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut cmd = self.gpg();
        cmd.args(["--local-user", self.config.key.as_str(), "--clearsign", "--output", "-"]);
        tool::run(cmd, &self.config.gpg, Some(data), self.config.timeout).await
    }

    async fn export_public_key(&self) -> Result<Vec<u8>> {
        let mut cmd = self.gpg();
        cmd.args(["--export", self.config.key.as_str()]);
        let key = tool::run(cmd, &self.config.gpg, None, self.config.timeout).await?;
        if key.is_empty() {
            bail!("gpg has no public key for '{}'", self.config.key);
        }
        Ok(key)
    }
}
