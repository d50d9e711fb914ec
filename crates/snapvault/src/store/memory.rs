//! In-memory snapshot store, mainly for tests and local experiments.

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use clippy_utilities::NumericCast;
use tokio::io::AsyncReadExt;

use super::{SnapReader, SnapStore, StoreError};

/// Snapshot store backed by process memory.
///
/// Objects live in a sorted map so `list` comes back in lexical order
/// without extra work, matching the durable stores.
#[derive(Debug, Default)]
pub struct MemorySnapStore {
    /// Object name to object bytes
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Names currently marked as in use
    in_use: Mutex<HashSet<String>>,
}

impl MemorySnapStore {
    /// Creates an empty store
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object directly, bypassing the streaming path
    #[inline]
    pub fn insert_object(&self, name: &str, data: Vec<u8>) {
        let mut objects = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _prev = objects.insert(name.to_owned(), data);
    }

    /// Marks an object as in use so `is_in_use` reports it
    #[inline]
    pub fn mark_in_use(&self, name: &str) {
        let mut in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        let _prev = in_use.insert(name.to_owned());
    }

    /// Clears the in-use marker of an object
    #[inline]
    pub fn release_in_use(&self, name: &str) {
        let mut in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        let _prev = in_use.remove(name);
    }
}

#[async_trait]
impl SnapStore for MemorySnapStore {
    #[inline]
    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let objects = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(objects.keys().cloned().collect())
    }

    #[inline]
    async fn put(&self, name: &str, mut src: SnapReader) -> Result<u64, StoreError> {
        let mut data = Vec::new();
        let _n = src
            .read_to_end(&mut data)
            .await
            .map_err(|e| StoreError::Io(name.to_owned(), e))?;
        let written = data.len().numeric_cast();
        self.insert_object(name, data);
        Ok(written)
    }

    #[inline]
    async fn get(&self, name: &str) -> Result<SnapReader, StoreError> {
        let objects = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let data = objects
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))?
            .clone();
        Ok(Box::new(Cursor::new(data)))
    }

    #[inline]
    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut objects = self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if objects.remove(name).is_none() {
            return Err(StoreError::NotFound(name.to_owned()));
        }
        Ok(())
    }

    #[inline]
    async fn is_in_use(&self, name: &str) -> bool {
        let in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        in_use.contains(name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn put_then_get_returns_the_same_bytes() {
        let store = MemorySnapStore::new();
        let written = store
            .put("Full-0-9-1", Box::new(Cursor::new(b"payload".to_vec())))
            .await
            .unwrap();
        assert_eq!(written, 7);

        let mut reader = store.get("Full-0-9-1").await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"payload");
    }

    #[tokio::test]
    async fn list_is_sorted_and_delete_removes() {
        let store = MemorySnapStore::new();
        store.insert_object("b", vec![2]);
        store.insert_object("a", vec![1]);
        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);

        store.delete("a").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["b"]);
        assert!(matches!(
            store.delete("a").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn in_use_marker_round_trip() {
        let store = MemorySnapStore::new();
        store.insert_object("a", vec![1]);
        assert!(!store.is_in_use("a").await);
        store.mark_in_use("a");
        assert!(store.is_in_use("a").await);
        store.release_in_use("a");
        assert!(!store.is_in_use("a").await);
    }
}
