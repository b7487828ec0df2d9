//! In-memory backend with failure injection, for exercising the record source.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{DirEntry, StorageBackend, join, observe};
use crate::error::StorageError;
use crate::metrics::events::StorageOperation;

const KIND: &str = "memory";

/// Directories of named byte blobs, listed in insertion order.
///
/// Clones share state, so a test can keep a handle while the source owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    dirs: HashMap<String, Vec<(String, Bytes)>>,
    failing_lists: u32,
    failing_opens: HashSet<String>,
    failing_renames: HashSet<String>,
    scheduled: Vec<Scheduled>,
    list_calls: u32,
    open_calls: HashMap<String, u32>,
}

#[derive(Debug)]
struct Scheduled {
    after_lists: u32,
    dir: String,
    name: String,
    data: Bytes,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a file.
    pub fn put(&self, dir: &str, name: &str, data: impl Into<Bytes>) {
        self.state().insert(dir, name, data.into());
    }

    /// Add a file that becomes visible once `after_lists` listings have completed.
    pub fn schedule(&self, after_lists: u32, dir: &str, name: &str, data: impl Into<Bytes>) {
        self.state().scheduled.push(Scheduled {
            after_lists,
            dir: dir.to_string(),
            name: name.to_string(),
            data: data.into(),
        });
    }

    /// File names in `dir`, in listing order.
    pub fn entries(&self, dir: &str) -> Vec<String> {
        self.state()
            .dirs
            .get(dir)
            .map(|files| files.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    /// Fail the next `count` listings.
    pub fn fail_next_lists(&self, count: u32) {
        self.state().failing_lists = count;
    }

    /// Fail every open of `name` until cleared.
    pub fn fail_opens_of(&self, name: &str) {
        self.state().failing_opens.insert(name.to_string());
    }

    /// Fail every rename of `name` until cleared.
    pub fn fail_renames_of(&self, name: &str) {
        self.state().failing_renames.insert(name.to_string());
    }

    pub fn clear_rename_failures(&self) {
        self.state().failing_renames.clear();
    }

    /// Number of `list` calls so far, failed ones included.
    pub fn list_calls(&self) -> u32 {
        self.state().list_calls
    }

    /// Number of `open` calls made for `name`.
    pub fn open_calls(&self, name: &str) -> u32 {
        self.state().open_calls.get(name).copied().unwrap_or_default()
    }
}

impl State {
    fn insert(&mut self, dir: &str, name: &str, data: Bytes) {
        let files = self.dirs.entry(dir.to_string()).or_default();
        match files.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = data,
            None => files.push((name.to_string(), data)),
        }
    }

    fn release_scheduled(&mut self) {
        let completed = self.list_calls;
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|s| s.after_lists <= completed);
        self.scheduled = pending;
        for file in due {
            self.insert(&file.dir, &file.name, file.data);
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>, StorageError> {
        observe(KIND, StorageOperation::List, async {
            let mut state = self.state();
            state.release_scheduled();
            state.list_calls += 1;

            if state.failing_lists > 0 {
                state.failing_lists -= 1;
                return Err(StorageError::Unavailable {
                    message: format!("listing {dir} failed"),
                });
            }

            Ok(state
                .dirs
                .get(dir)
                .map(|files| {
                    files
                        .iter()
                        .map(|(name, data)| DirEntry {
                            name: name.clone(),
                            size: data.len() as u64,
                        })
                        .collect()
                })
                .unwrap_or_default())
        })
        .await
    }

    async fn open(&self, dir: &str, name: &str) -> Result<Bytes, StorageError> {
        observe(KIND, StorageOperation::Open, async {
            let mut state = self.state();
            *state.open_calls.entry(name.to_string()).or_default() += 1;

            if state.failing_opens.contains(name) {
                return Err(StorageError::Unavailable {
                    message: format!("opening {} failed", join(dir, name)),
                });
            }

            state
                .dirs
                .get(dir)
                .and_then(|files| files.iter().find(|(existing, _)| existing == name))
                .map(|(_, data)| data.clone())
                .ok_or_else(|| StorageError::NotFound {
                    path: join(dir, name),
                })
        })
        .await
    }

    async fn rename(&self, from_dir: &str, to_dir: &str, name: &str) -> Result<(), StorageError> {
        observe(KIND, StorageOperation::Rename, async {
            let mut state = self.state();

            if state.failing_renames.contains(name) {
                return Err(StorageError::Unavailable {
                    message: format!("moving {} failed", join(from_dir, name)),
                });
            }

            let files = state.dirs.get_mut(from_dir);
            let position = files
                .as_ref()
                .and_then(|files| files.iter().position(|(existing, _)| existing == name));
            let (Some(files), Some(position)) = (files, position) else {
                return Err(StorageError::NotFound {
                    path: join(from_dir, name),
                });
            };

            let (_, data) = files.remove(position);
            state.insert(to_dir, name, data);
            Ok(())
        })
        .await
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_keeps_insertion_order() {
        let backend = MemoryBackend::new();
        backend.put("in", "b.gz", "2");
        backend.put("in", "a.gz", "1");
        backend.put("in", "c.gz", "3");

        let names: Vec<_> = backend
            .list("in")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["b.gz", "a.gz", "c.gz"]);
    }

    #[tokio::test]
    async fn test_rename_moves_between_dirs() {
        let backend = MemoryBackend::new();
        backend.put("in", "a.gz", "1");

        backend.rename("in", "ready", "a.gz").await.unwrap();

        assert!(backend.entries("in").is_empty());
        assert_eq!(backend.entries("ready"), vec!["a.gz"]);
        assert!(backend.rename("in", "ready", "a.gz").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = MemoryBackend::new();
        backend.put("in", "a.gz", "1");
        backend.fail_next_lists(1);
        backend.fail_opens_of("a.gz");
        backend.fail_renames_of("a.gz");

        assert!(backend.list("in").await.is_err());
        assert_eq!(backend.list("in").await.unwrap().len(), 1);
        assert!(backend.open("in", "a.gz").await.is_err());
        assert_eq!(backend.open_calls("a.gz"), 1);
        assert!(backend.rename("in", "ready", "a.gz").await.is_err());

        backend.clear_rename_failures();
        backend.rename("in", "ready", "a.gz").await.unwrap();
        assert_eq!(backend.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_scheduled_file_appears_after_listings() {
        let backend = MemoryBackend::new();
        backend.schedule(2, "in", "late.gz", "x");

        assert!(backend.list("in").await.unwrap().is_empty());
        assert!(backend.list("in").await.unwrap().is_empty());
        assert_eq!(backend.list("in").await.unwrap().len(), 1);
    }
}
