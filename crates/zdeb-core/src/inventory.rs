//! The local working copy of the repository.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use zdeb_schema::ArtifactName;

use crate::error::SyncError;

/// Files present in the local repository directory, keyed by filename.
///
/// Grows monotonically during a run: MIRROR adds remote objects, BUILD adds
/// new artifacts, METADATA adds (or replaces) index files. Nothing is ever
/// removed.
#[derive(Debug, Clone)]
pub struct LocalInventory {
    root: PathBuf,
    files: BTreeSet<String>,
}

impl LocalInventory {
    /// Scan `root` (created if missing). Only top-level regular files count.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the directory cannot be created or read.
    pub fn scan(root: &Path) -> Result<Self, SyncError> {
        std::fs::create_dir_all(root).map_err(|e| SyncError::io(root, e))?;

        let mut files = BTreeSet::new();
        for entry in walkdir::WalkDir::new(root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                SyncError::io(&path, std::io::Error::other(e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                // In-progress downloads from an interrupted run.
                if !name.starts_with('.') {
                    files.insert(name.to_string());
                }
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    /// Repository directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `key` inside the repository directory.
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.files.contains(key)
    }

    /// Record a file that was placed in the directory.
    pub fn insert(&mut self, key: impl Into<String>) {
        self.files.insert(key.into());
    }

    /// Every file, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(String::as_str)
    }

    /// Package artifacts only, sorted by filename.
    pub fn artifacts(&self) -> impl Iterator<Item = &str> {
        self.keys().filter(|k| ArtifactName::is_artifact_key(k))
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the directory holds no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write `data` as `key`, going through a dot-file so a crash never
    /// leaves a truncated object under its final name.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] on write or rename failure.
    pub async fn store(&mut self, key: &str, data: &[u8]) -> Result<(), SyncError> {
        write_atomic(&self.root, key, data).await?;
        self.insert(key);
        Ok(())
    }
}

/// Write `root/key` via a temporary `.key.part` file and a rename.
///
/// # Errors
///
/// Returns [`SyncError::Io`] on failure.
pub async fn write_atomic(root: &Path, key: &str, data: &[u8]) -> Result<(), SyncError> {
    let dest = root.join(key);
    let part = root.join(format!(".{key}.part"));
    tokio::fs::write(&part, data)
        .await
        .map_err(|e| SyncError::io(&part, e))?;
    tokio::fs::rename(&part, &dest)
        .await
        .map_err(|e| SyncError::io(&dest, e))?;
    Ok(())
}
