//! In-memory object store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Metadata, ObjectStore};
use crate::acme::StorageError;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    metadata: Metadata,
}

/// Object store kept in process memory.
///
/// Used for dry runs and tests. Counts writes per path and listings, and can
/// be told to reject writes below a prefix.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    put_counts: RwLock<HashMap<String, usize>>,
    lists: AtomicUsize,
    failing_prefix: RwLock<Option<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful puts to `path`
    pub fn put_count(&self, path: &str) -> usize {
        self.put_counts.read().get(path).copied().unwrap_or(0)
    }

    /// Total number of successful puts
    pub fn total_puts(&self) -> usize {
        self.put_counts.read().values().sum()
    }

    /// Reject subsequent puts whose path starts with `prefix`
    pub fn fail_puts_under(&self, prefix: &str) {
        *self.failing_prefix.write() = Some(prefix.to_string());
    }

    /// Accept all puts again
    pub fn clear_failures(&self) {
        *self.failing_prefix.write() = None;
    }

    /// Number of `list` calls
    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Whether an object exists
    pub fn contains(&self, path: &str) -> bool {
        self.objects.read().contains_key(path)
    }

    fn not_found(path: &str) -> StorageError {
        StorageError::NotFound {
            path: path.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .get(path)
            .map(|object| object.body.clone())
            .ok_or_else(|| Self::not_found(path))
    }

    async fn put(
        &self,
        path: &str,
        body: Vec<u8>,
        metadata: Metadata,
    ) -> Result<(), StorageError> {
        if let Some(prefix) = self.failing_prefix.read().as_deref() {
            if path.starts_with(prefix) {
                return Err(StorageError::Write {
                    path: path.to_string(),
                    message: "write rejected".to_string(),
                });
            }
        }

        self.objects
            .write()
            .insert(path.to_string(), StoredObject { body, metadata });
        *self.put_counts.write().entry(path.to_string()).or_insert(0) += 1;

        Ok(())
    }

    async fn head(&self, path: &str) -> Result<Metadata, StorageError> {
        self.objects
            .read()
            .get(path)
            .map(|object| object.metadata.clone())
            .ok_or_else(|| Self::not_found(path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let mut paths: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }
}
