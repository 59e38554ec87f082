//! Filesystem-backed object store.
//!
//! Each object is a single file below the root directory. The file starts
//! with `Name: value` metadata lines, followed by an empty line and the raw
//! body. Writes go to a temporary sibling that is renamed into place, so
//! body and metadata become visible together.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, trace};

use super::{Metadata, ObjectStore};
use crate::acme::StorageError;

const TEMP_SUFFIX: &str = ".tmp";

/// Object store rooted at a local directory
#[derive(Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open the store, creating the root directory if needed
    ///
    /// The root is restricted to the owner (0700 on Unix) since it holds
    /// private keys.
    pub fn new(root: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(root, std::fs::Permissions::from_mode(0o700))?;
        }

        info!(storage_path = %root.display(), "Initialized object store");

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !valid {
            return Err(StorageError::Backend(format!(
                "Invalid object path '{}'",
                path
            )));
        }

        Ok(self.root.join(relative))
    }
}

fn not_found_or_io(err: std::io::Error, path: &str) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound {
            path: path.to_string(),
        }
    } else {
        StorageError::Io(err)
    }
}

fn corrupt(path: &str) -> StorageError {
    StorageError::Backend(format!("Object '{}' has a malformed header", path))
}

fn temp_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

fn encode(body: &[u8], metadata: &Metadata) -> Result<Vec<u8>, StorageError> {
    let mut entries: Vec<_> = metadata.iter().collect();
    entries.sort();

    let mut out = Vec::with_capacity(body.len() + 64);
    for (name, value) in entries {
        if name.is_empty() || name.contains([':', '\n', '\r']) || value.contains(['\n', '\r']) {
            return Err(StorageError::Backend(format!(
                "Invalid metadata entry '{}'",
                name
            )));
        }
        out.extend_from_slice(format!("{}: {}\n", name, value).as_bytes());
    }
    out.push(b'\n');
    out.extend_from_slice(body);

    Ok(out)
}

fn parse_header(path: &str, line: &str) -> Result<(String, String), StorageError> {
    line.split_once(": ")
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| corrupt(path))
}

fn decode(path: &str, bytes: &[u8]) -> Result<(Metadata, Vec<u8>), StorageError> {
    let mut metadata = Metadata::new();
    let mut rest = bytes;

    loop {
        let Some(end) = rest.iter().position(|b| *b == b'\n') else {
            return Err(corrupt(path));
        };
        let line = &rest[..end];
        rest = &rest[end + 1..];

        if line.is_empty() {
            return Ok((metadata, rest.to_vec()));
        }

        let line = std::str::from_utf8(line).map_err(|_| corrupt(path))?;
        let (name, value) = parse_header(path, line)?;
        metadata.insert(name, value);
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let file_path = self.object_path(path)?;
        let bytes = fs::read(&file_path)
            .await
            .map_err(|e| not_found_or_io(e, path))?;

        trace!(path = %path, size = bytes.len(), "Read object");

        let (_, body) = decode(path, &bytes)?;
        Ok(body)
    }

    async fn put(
        &self,
        path: &str,
        body: Vec<u8>,
        metadata: Metadata,
    ) -> Result<(), StorageError> {
        let file_path = self.object_path(path)?;
        let contents = encode(&body, &metadata)?;
        let write_err = |e: std::io::Error| StorageError::Write {
            path: path.to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let temp = temp_path(&file_path);
        fs::write(&temp, &contents).await.map_err(write_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(write_err)?;
        }

        fs::rename(&temp, &file_path).await.map_err(write_err)?;

        trace!(path = %path, size = body.len(), "Wrote object");
        Ok(())
    }

    async fn head(&self, path: &str) -> Result<Metadata, StorageError> {
        let file_path = self.object_path(path)?;
        let file = fs::File::open(&file_path)
            .await
            .map_err(|e| not_found_or_io(e, path))?;

        let mut reader = BufReader::new(file);
        let mut metadata = Metadata::new();
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Err(corrupt(path));
            }

            let Some(header) = line.strip_suffix('\n') else {
                return Err(corrupt(path));
            };
            if header.is_empty() {
                return Ok(metadata);
            }

            let (name, value) = parse_header(path, header)?;
            metadata.insert(name, value);
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(entry_path);
                    continue;
                }

                let Some(key) = entry_path
                    .strip_prefix(&self.root)
                    .ok()
                    .and_then(|relative| relative.to_str())
                    .map(|relative| relative.replace(std::path::MAIN_SEPARATOR, "/"))
                else {
                    continue;
                };

                if key.starts_with(prefix) && !key.ends_with(TEMP_SUFFIX) {
                    found.push(key);
                }
            }
        }

        found.sort();
        Ok(found)
    }
}
