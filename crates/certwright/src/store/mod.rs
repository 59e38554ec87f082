//! Object store implementations.
//!
//! Objects are addressed by slash-separated paths such as
//! `certs/example.com.crt` and carry a small map of user metadata that is
//! written in the same put as the body.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;

use crate::acme::StorageError;

/// User metadata attached to an object
pub type Metadata = HashMap<String, String>;

/// Blob storage with per-object metadata.
#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Fetch an object body. Absent objects yield [`StorageError::NotFound`].
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or replace an object together with its metadata.
    async fn put(&self, path: &str, body: Vec<u8>, metadata: Metadata)
        -> Result<(), StorageError>;

    /// Fetch only the metadata of an object.
    async fn head(&self, path: &str) -> Result<Metadata, StorageError>;

    /// List every object path starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
