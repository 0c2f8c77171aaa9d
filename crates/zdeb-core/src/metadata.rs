//! Repository index and signature generation.
//!
//! Output is a function of the artifact set, the repository settings and the
//! supplied timestamp only. It is always regenerated from the complete local
//! inventory, never patched.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use async_compression::tokio::write::BzEncoder;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncWriteExt;

use crate::config::RepositoryConfig;
use crate::deb;
use crate::error::SyncError;
use crate::inventory::LocalInventory;
use crate::signer::Signer;
use crate::templates;

/// Package index.
pub const PACKAGES: &str = "Packages";
/// Compressed package index.
pub const PACKAGES_BZ2: &str = "Packages.bz2";
/// Repository description with index checksums.
pub const RELEASE: &str = "Release";
/// Detached signature of `Release`.
pub const RELEASE_GPG: &str = "Release.gpg";
/// Clear-signed `Release`.
pub const IN_RELEASE: &str = "InRelease";
/// Installer script.
pub const INSTALL_SH: &str = "install.sh";
/// Landing page.
pub const INDEX_HTML: &str = "index.html";

/// The five index and signature files.
pub const INDEX_FILES: [&str; 5] = [PACKAGES, PACKAGES_BZ2, RELEASE, RELEASE_GPG, IN_RELEASE];

/// Unsigned index files derived from the artifact set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFiles {
    /// `Packages` contents.
    pub packages: Vec<u8>,
    /// `Packages.bz2` contents.
    pub packages_bz2: Vec<u8>,
    /// `Release` contents.
    pub release: Vec<u8>,
}

/// Whether every index and signature file is already present locally.
pub fn is_complete(inventory: &LocalInventory) -> bool {
    INDEX_FILES.iter().all(|f| inventory.contains(f))
}

fn metadata_err(context: &str, e: impl std::fmt::Display) -> SyncError {
    SyncError::MetadataFailed(format!("{context}: {e:#}"))
}

/// `Packages` stanza for one artifact.
///
/// # Errors
///
/// Returns [`SyncError::MetadataFailed`] if the control data cannot be read.
pub fn packages_stanza(filename: &str, bytes: &[u8]) -> Result<String, SyncError> {
    let control = deb::read_control(bytes).map_err(|e| metadata_err(filename, e))?;
    let mut stanza = control.trim_end().to_string();
    stanza.push('\n');
    let _ = writeln!(stanza, "Filename: ./{filename}");
    let _ = writeln!(stanza, "Size: {}", bytes.len());
    let _ = writeln!(stanza, "SHA256: {}", hex::encode(Sha256::digest(bytes)));
    let _ = writeln!(stanza, "SHA512: {}", hex::encode(Sha512::digest(bytes)));
    Ok(stanza)
}

/// `Release` text over the given index files.
pub fn release_text(
    repo: &RepositoryConfig,
    architectures: &BTreeSet<String>,
    date: DateTime<Utc>,
    indices: &[(&str, &[u8])],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Origin: {}", repo.origin);
    let _ = writeln!(out, "Label: {}", repo.label);
    if !architectures.is_empty() {
        let archs: Vec<&str> = architectures.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Architectures: {}", archs.join(" "));
    }
    let _ = writeln!(out, "Date: {}", date.format("%a, %d %b %Y %H:%M:%S UTC"));
    out.push_str("SHA256:\n");
    for (name, data) in indices {
        let _ = writeln!(out, " {} {} {name}", hex::encode(Sha256::digest(data)), data.len());
    }
    out.push_str("SHA512:\n");
    for (name, data) in indices {
        let _ = writeln!(out, " {} {} {name}", hex::encode(Sha512::digest(data)), data.len());
    }
    out
}

async fn bzip2(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = BzEncoder::new(Vec::new());
    encoder.write_all(data).await?;
    encoder.shutdown().await?;
    Ok(encoder.into_inner())
}

/// Compute the unsigned index over every artifact in `inventory`.
///
/// # Errors
///
/// Returns [`SyncError::MetadataFailed`] if an artifact cannot be read or
/// parsed.
pub async fn build_index(
    inventory: &LocalInventory,
    repo: &RepositoryConfig,
    date: DateTime<Utc>,
) -> Result<IndexFiles, SyncError> {
    let mut packages = String::new();
    let mut architectures = BTreeSet::new();

    for (i, name) in inventory.artifacts().enumerate() {
        let path = inventory.path_of(name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| metadata_err(&path.display().to_string(), e))?;
        let stanza = packages_stanza(name, &bytes)?;
        if let Some(arch) = deb::control_field(&stanza, "Architecture") {
            architectures.insert(arch.to_string());
        }
        if i > 0 {
            packages.push('\n');
        }
        packages.push_str(&stanza);
    }

    let packages = packages.into_bytes();
    let packages_bz2 = bzip2(&packages)
        .await
        .map_err(|e| metadata_err(PACKAGES_BZ2, e))?;
    let release = release_text(
        repo,
        &architectures,
        date,
        &[(PACKAGES, packages.as_slice()), (PACKAGES_BZ2, packages_bz2.as_slice())],
    )
    .into_bytes();

    Ok(IndexFiles {
        packages,
        packages_bz2,
        release,
    })
}

/// Writes the full metadata set into the local inventory.
pub struct MetadataGenerator {
    repo: RepositoryConfig,
    package: String,
    signer: Arc<dyn Signer>,
}

impl MetadataGenerator {
    /// Create a generator for `package` published under `repo`.
    pub fn new(repo: RepositoryConfig, package: impl Into<String>, signer: Arc<dyn Signer>) -> Self {
        Self {
            repo,
            package: package.into(),
            signer,
        }
    }

    /// Every key the generator owns, in upload order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = INDEX_FILES.to_vec();
        keys.extend([self.repo.key_file.as_str(), INSTALL_SH, INDEX_HTML]);
        keys
    }

    /// Regenerate index, signatures, public key and templates.
    ///
    /// Returns the keys written, in upload order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MetadataFailed`] on index or signing failure and
    /// [`SyncError::Io`] if a file cannot be written.
    pub async fn generate(
        &self,
        inventory: &mut LocalInventory,
        date: DateTime<Utc>,
    ) -> Result<Vec<String>, SyncError> {
        let index = build_index(inventory, &self.repo, date).await?;

        let release_gpg = self
            .signer
            .detach_sign(&index.release)
            .await
            .map_err(|e| metadata_err(RELEASE_GPG, e))?;
        let in_release = self
            .signer
            .clearsign(&index.release)
            .await
            .map_err(|e| metadata_err(IN_RELEASE, e))?;
        let public_key = self
            .signer
            .export_public_key()
            .await
            .map_err(|e| metadata_err(&self.repo.key_file, e))?;

        let vars = [
            ("site_url", self.repo.site_url.as_str()),
            ("key_file", self.repo.key_file.as_str()),
            ("package", self.package.as_str()),
        ];
        let install_sh = templates::render(templates::INSTALL_SH, &vars);
        let index_html = templates::render(templates::INDEX_HTML, &vars);

        let files: [(&str, &[u8]); 8] = [
            (PACKAGES, index.packages.as_slice()),
            (PACKAGES_BZ2, index.packages_bz2.as_slice()),
            (RELEASE, index.release.as_slice()),
            (RELEASE_GPG, release_gpg.as_slice()),
            (IN_RELEASE, in_release.as_slice()),
            (self.repo.key_file.as_str(), public_key.as_slice()),
            (INSTALL_SH, install_sh.as_bytes()),
            (INDEX_HTML, index_html.as_bytes()),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (key, data) in files {
            inventory.store(key, data).await?;
            written.push(key.to_string());
        }
        Ok(written)
    }
}
