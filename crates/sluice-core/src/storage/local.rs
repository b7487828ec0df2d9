//! Local filesystem backend on `object_store`'s `LocalFileSystem`.
//!
//! Listings read the directory with `tokio::fs` so every file name is seen
//! exactly as it is on disk.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use snafu::prelude::*;
use std::path::{Path as FsPath, PathBuf};
use tracing::warn;

use super::{DirEntry, StorageBackend, join, observe};
use crate::error::{InvalidPathSnafu, IoSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::StorageOperation;

const KIND: &str = "local";

/// Intake directories on the local filesystem.
///
/// Renames are `std::fs::rename` underneath, so archiving is atomic as long as
/// the intake and ready directories share a filesystem.
#[derive(Debug)]
pub struct LocalBackend {
    store: LocalFileSystem,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            store: LocalFileSystem::new(),
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether object_store reserves `name` for its own upload staging.
///
/// `LocalFileSystem` hides names ending in `#<digits>` from listings and
/// refuses to address them, so those go through `tokio::fs` directly.
fn is_staging_name(name: &str) -> bool {
    match name.rsplit_once('#') {
        Some((_, suffix)) => !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

async fn canonical_dir(dir: &str) -> Result<PathBuf, StorageError> {
    tokio::fs::canonicalize(dir).await.context(IoSnafu { path: dir })
}

/// Object store location of `name` inside an existing directory.
///
/// The name is taken verbatim; `Path::child` would percent-encode characters
/// such as `[`, `%` or `~` and address a different file.
fn location(dir: &FsPath, name: &str) -> Result<Path, StorageError> {
    let file = dir.join(name);
    Path::from_absolute_path(&file).context(InvalidPathSnafu {
        path: file.display().to_string(),
    })
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, StorageError> {
        observe(KIND, StorageOperation::List, async {
            let mut entries = tokio::fs::read_dir(dir).await.context(IoSnafu { path: dir })?;
            let mut files = Vec::new();

            while let Some(entry) = entries.next_entry().await.context(IoSnafu { path: dir })? {
                let metadata = entry.metadata().await.context(IoSnafu { path: dir })?;
                if !metadata.is_file() {
                    continue;
                }
                match entry.file_name().into_string() {
                    Ok(name) => files.push(DirEntry {
                        name,
                        size: metadata.len(),
                    }),
                    Err(raw) => warn!(dir, name = ?raw, "Skipping file with a non UTF-8 name"),
                }
            }
            Ok(files)
        })
        .await
    }

    async fn open(&self, dir: &str, name: &str) -> Result<Bytes, StorageError> {
        let path = join(dir, name);
        observe(KIND, StorageOperation::Open, async {
            let dir = canonical_dir(dir).await?;
            if is_staging_name(name) {
                let data = tokio::fs::read(dir.join(name))
                    .await
                    .context(IoSnafu { path: path.as_str() })?;
                return Ok(Bytes::from(data));
            }

            self.store
                .get(&location(&dir, name)?)
                .await
                .context(ObjectStoreSnafu { path: path.as_str() })?
                .bytes()
                .await
                .context(ObjectStoreSnafu { path: path.as_str() })
        })
        .await
    }

    async fn rename(&self, from_dir: &str, to_dir: &str, name: &str) -> Result<(), StorageError> {
        let path = join(from_dir, name);
        observe(KIND, StorageOperation::Rename, async {
            tokio::fs::create_dir_all(to_dir)
                .await
                .context(IoSnafu { path: to_dir })?;

            let from_dir = canonical_dir(from_dir).await?;
            let to_dir = canonical_dir(to_dir).await?;
            if is_staging_name(name) {
                return tokio::fs::rename(from_dir.join(name), to_dir.join(name))
                    .await
                    .context(IoSnafu { path: path.as_str() });
            }

            self.store
                .rename(&location(&from_dir, name)?, &location(&to_dir, name)?)
                .await
                .context(ObjectStoreSnafu { path: path.as_str() })
        })
        .await
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn describe(&self) -> String {
        "file://".to_string()
    }
}
