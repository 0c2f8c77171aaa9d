//! Remote object store holding the published repository.
//!
//! The store is flat: artifacts, index files, signatures and templates all
//! live at the top level, keyed by filename.

mod memory;
mod object;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::SyncError;

pub use memory::MemoryStore;
pub use object::ObjectStore;

/// Minimal key/value surface the synchronizer needs.
///
/// Every failure is fatal to the run and surfaces as
/// [`SyncError::StoreUnavailable`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Keys of every object currently in the store.
    async fn list(&self) -> Result<BTreeSet<String>, SyncError>;

    /// Full contents of `key`.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, SyncError>;

    /// Create or replace `key`.
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), SyncError>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn list(&self) -> Result<BTreeSet<String>, SyncError> {
        (**self).list().await
    }
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        (**self).fetch(key).await
    }
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), SyncError> {
        (**self).upload(key, data).await
    }
}

/// Open the store described by `config`.
///
/// # Errors
///
/// Returns [`SyncError::StoreUnavailable`] if the backend cannot be
/// initialised (e.g. missing credentials for S3).
pub fn open(config: &StoreConfig) -> Result<Arc<dyn RemoteStore>, SyncError> {
    Ok(Arc::new(ObjectStore::from_config(config)?))
}
