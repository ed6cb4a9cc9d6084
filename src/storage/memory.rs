//! In-memory storage backend.
//!
//! Backs the protocol tests that need determinism the filesystem
//! cannot give: injected rename failures stand in for a peer winning a
//! compare-and-swap race at exactly the wrong moment. The map is also
//! a convenient stand-in backend for embedding applications' own tests.

use super::backend::{Entry, Storage, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    /// Normalized path -> last-modified time. BTreeMap keeps listings
    /// ordered by name for free.
    entries: BTreeMap<String, DateTime<Utc>>,

    /// Errors to return from upcoming `rename` calls, in order.
    rename_faults: VecDeque<StorageError>,
}

/// In-process [`Storage`] over a shared map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next `rename` call. Each queued error is
    /// consumed by exactly one call; later calls behave normally.
    pub fn inject_rename_error(&self, err: StorageError) {
        self.lock_inner().rename_faults.push_back(err);
    }

    /// Number of entries currently stored, across all directories.
    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

impl Storage for MemoryStorage {
    fn create(&self, path: &str) -> StorageResult<()> {
        let key = normalize(path);
        let mut inner = self.lock_inner();
        if inner.entries.contains_key(&key) {
            return Err(StorageError::AlreadyExists(key));
        }
        inner.entries.insert(key, Utc::now());
        Ok(())
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<Entry>> {
        let prefix = format!("{}/", normalize(dir));
        let inner = self.lock_inner();
        let entries = inner
            .entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, modified)| {
                let name = &key[prefix.len()..];
                // Entries in subdirectories are not direct children.
                if name.contains('/') {
                    return None;
                }
                Some(Entry {
                    name: name.to_string(),
                    last_modified: Some(*modified),
                })
            })
            .collect();
        Ok(entries)
    }

    fn rename(&self, old: &str, new: &str) -> StorageResult<()> {
        let old_key = normalize(old);
        let new_key = normalize(new);
        let mut inner = self.lock_inner();

        if let Some(fault) = inner.rename_faults.pop_front() {
            return Err(fault);
        }
        if !inner.entries.contains_key(&old_key) {
            return Err(StorageError::NotFound(old_key));
        }
        if inner.entries.contains_key(&new_key) {
            return Err(StorageError::AlreadyExists(new_key));
        }
        inner.entries.remove(&old_key);
        inner.entries.insert(new_key, Utc::now());
        Ok(())
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        let key = normalize(path);
        let mut inner = self.lock_inner();
        match inner.entries.remove(&key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_duplicate_create_fails() {
        let storage = MemoryStorage::new();

        storage.create("logs/t/0/lock_1").unwrap();
        let err = storage.create("/logs/t/0/lock_1").unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[test]
    fn list_returns_direct_children_in_order() {
        let storage = MemoryStorage::new();

        storage.create("logs/t/0/lock_2").unwrap();
        storage.create("logs/t/0/lock_1").unwrap();
        storage.create("logs/t/0/nested/lock_3").unwrap();
        storage.create("logs/t/1/lock_4").unwrap();

        let names: Vec<String> = storage
            .list("logs/t/0")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["lock_1", "lock_2"]);
    }

    #[test]
    fn list_missing_directory_is_empty() {
        let storage = MemoryStorage::new();
        assert!(storage.list("logs/none").unwrap().is_empty());
    }

    #[test]
    fn rename_is_fail_if_exists() {
        let storage = MemoryStorage::new();

        storage.create("d/lock_1").unwrap();
        storage.create("d/lock_2").unwrap();

        let err = storage.rename("d/lock_1", "d/lock_2").unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        let err = storage.rename("d/lock_9", "d/lock_3").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        storage.rename("d/lock_1", "d/lock_3").unwrap();
        let names: Vec<String> = storage
            .list("d")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["lock_2", "lock_3"]);
    }

    #[test]
    fn injected_rename_errors_fire_once_each() {
        let storage = MemoryStorage::new();
        storage.create("d/lock_1").unwrap();

        storage.inject_rename_error(StorageError::AlreadyExists("d/lock_2".to_string()));
        let err = storage.rename("d/lock_1", "d/lock_2").unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        // Fault consumed; the same rename now goes through.
        storage.rename("d/lock_1", "d/lock_2").unwrap();
    }

    #[test]
    fn delete_removes_entries() {
        let storage = MemoryStorage::new();
        storage.create("d/lock_1").unwrap();

        storage.delete("d/lock_1").unwrap();
        assert!(storage.is_empty());
        assert!(matches!(
            storage.delete("d/lock_1").unwrap_err(),
            StorageError::NotFound(_)
        ));
    }
}
