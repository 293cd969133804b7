//! In-memory watermark store
//!
//! Keeps every `set` per key so callers can assert on the checkpoint trail.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::domain::{Checkpoint, WatermarkStore};
use crate::Result;

#[derive(Default)]
pub struct InMemoryWatermarkStore {
    history: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one checkpoint per key
    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, Checkpoint)>) -> Self {
        let store = Self::new();
        {
            let mut history = store.history.lock();
            for (key, checkpoint) in entries {
                history.entry(key.to_string()).or_default().push(checkpoint);
            }
        }
        store
    }

    /// Every value written for `key`, oldest first
    pub fn history(&self, key: &str) -> Vec<Checkpoint> {
        self.history.lock().get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn get(&self, key: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .history
            .lock()
            .get(key)
            .and_then(|values| values.last().copied()))
    }

    async fn set(&self, key: &str, checkpoint: Checkpoint) -> Result<()> {
        self.history
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(checkpoint);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_tracks_writes() {
        let store = InMemoryWatermarkStore::new();
        let a: Checkpoint = "2021-01-01T00:00:00Z".parse().unwrap();
        let b: Checkpoint = "2021-01-02T00:00:00Z".parse().unwrap();

        store.set("k", a).await.unwrap();
        store.set("k", b).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(b));
        assert_eq!(store.history("k"), vec![a, b]);
        assert!(store.history("other").is_empty());
    }

    #[tokio::test]
    async fn test_seeded_entries() {
        let a: Checkpoint = "2021-01-01T00:00:00Z".parse().unwrap();
        let store = InMemoryWatermarkStore::with_entries([("last_genre_modified", a)]);

        assert_eq!(store.get("last_genre_modified").await.unwrap(), Some(a));
        assert_eq!(store.get("last_person_modified").await.unwrap(), None);
    }
}
