use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::RemoteStore;
use crate::error::SyncError;

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Vec<u8>>,
    uploads: Vec<String>,
    failing: BTreeSet<String>,
}

/// In-process [`RemoteStore`] that records every upload. Used in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `objects`. Seeding does not count as uploads.
    pub fn with_objects<K, V>(objects: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let store = Self::new();
        {
            let mut state = store.lock();
            for (k, v) in objects {
                state.objects.insert(k.into(), v.into());
            }
        }
        store
    }

    /// Make every future upload of `key` fail.
    pub fn fail_uploads_of(&self, key: impl Into<String>) {
        self.lock().failing.insert(key.into());
    }

    /// Keys uploaded so far, in upload order.
    pub fn uploads(&self) -> Vec<String> {
        self.lock().uploads.clone()
    }

    /// Contents of `key`, if present.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    /// Every key currently stored.
    pub fn keys(&self) -> BTreeSet<String> {
        self.lock().objects.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self) -> Result<BTreeSet<String>, SyncError> {
        Ok(self.keys())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, SyncError> {
        self.get(key)
            .ok_or_else(|| SyncError::store("fetch", key, "not found"))
    }

    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), SyncError> {
        let mut state = self.lock();
        if state.failing.contains(key) {
            return Err(SyncError::store("upload", key, "injected failure"));
        }
        state.objects.insert(key.to_string(), data);
        state.uploads.push(key.to_string());
        Ok(())
    }
}
