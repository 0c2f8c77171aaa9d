use std::collections::BTreeSet;

use async_trait::async_trait;
use opendal::services::{Fs, S3};
use opendal::Operator;

use super::RemoteStore;
use crate::config::StoreConfig;
use crate::error::SyncError;

/// [`RemoteStore`] backed by an `opendal` operator (S3 or local directory).
#[derive(Clone)]
pub struct ObjectStore {
    op: Operator,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("scheme", &self.op.info().scheme())
            .field("root", &self.op.info().root())
            .finish()
    }
}

impl ObjectStore {
    /// Wrap an existing operator.
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// Build the operator for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StoreUnavailable`] if the operator cannot be built.
    pub fn from_config(config: &StoreConfig) -> Result<Self, SyncError> {
        let op = match config {
            StoreConfig::S3 {
                bucket,
                endpoint,
                region,
                access_key,
                secret_key,
            } => {
                let mut builder = S3::default();
                builder.bucket(bucket);
                builder.region(region);
                if let Some(endpoint) = endpoint {
                    builder.endpoint(endpoint);
                }
                if let Some(key) = access_key {
                    builder.access_key_id(key);
                }
                if let Some(secret) = secret_key {
                    builder.secret_access_key(secret);
                }
                Operator::new(builder)
                    .map_err(|e| SyncError::store("open", bucket, e))?
                    .finish()
            }
            StoreConfig::Fs { root } => {
                let root = root.display().to_string();
                let mut builder = Fs::default();
                builder.root(&root);
                Operator::new(builder)
                    .map_err(|e| SyncError::store("open", &root, e))?
                    .finish()
            }
        };
        Ok(Self::new(op))
    }
}

#[async_trait]
impl RemoteStore for ObjectStore {
    async fn list(&self) -> Result<BTreeSet<String>, SyncError> {
        let entries = self
            .op
            .list("/")
            .await
            .map_err(|e| SyncError::store("list", "", e))?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| entry.name().to_string())
            .collect())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        let data = self
            .op
            .read(key)
            .await
            .map_err(|e| SyncError::store("fetch", key, e))?;
        Ok(data)
    }

    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), SyncError> {
        self.op
            .write(key, data)
            .await
            .map_err(|e| SyncError::store("upload", key, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_backend_round_trips_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::from_config(&StoreConfig::Fs {
            root: dir.path().to_path_buf(),
        })
        .unwrap();

        assert!(store.list().await.unwrap().is_empty());
        store
            .upload("zotero_6.0.27_amd64.deb", b"!<arch>\n".to_vec())
            .await
            .unwrap();
        store.upload("Release", b"Origin: zdeb\n".to_vec()).await.unwrap();

        let keys = store.list().await.unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["Release".to_string(), "zotero_6.0.27_amd64.deb".to_string()]
        );
        assert_eq!(store.fetch("Release").await.unwrap(), b"Origin: zdeb\n");
    }

    #[tokio::test]
    async fn missing_key_is_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::from_config(&StoreConfig::Fs {
            root: dir.path().to_path_buf(),
        })
        .unwrap();
        let err = store.fetch("Packages").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::StoreUnavailable { operation: "fetch", .. }
        ));
    }
}
