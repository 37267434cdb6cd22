//! Progress persistence: the durable cursor of a crawl stream.
//!
//! A checkpoint stores the last block whose records were fully delivered.
//! On restart the driver resumes at the block after it rather than crawling
//! from scratch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CrawlError;
use crate::types::BlockNumber;

/// A persisted cursor for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Stream key (e.g. `"ethereum:usdc-transfers"`).
    pub stream: String,
    /// Last fully processed block number.
    pub block_number: BlockNumber,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn now(stream: impl Into<String>, block_number: BlockNumber) -> Self {
        Self {
            stream: stream.into(),
            block_number,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Trait for storing and loading cursors.
///
/// One driver writes a given stream; any number of readers may load it.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self, stream: &str) -> Result<Option<Checkpoint>, CrawlError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CrawlError>;

    /// Delete a checkpoint (e.g. when resetting a stream).
    async fn delete(&self, stream: &str) -> Result<(), CrawlError>;
}

#[async_trait]
impl<T: ProgressStore + ?Sized> ProgressStore for Arc<T> {
    async fn load(&self, stream: &str) -> Result<Option<Checkpoint>, CrawlError> {
        (**self).load(stream).await
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CrawlError> {
        (**self).save(checkpoint).await
    }

    async fn delete(&self, stream: &str) -> Result<(), CrawlError> {
        (**self).delete(stream).await
    }
}

/// Cursor reads/writes for a single stream.
///
/// Saves are monotonic: a block lower than the last saved one is ignored.
pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    stream: String,
    last_saved: Option<BlockNumber>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>, stream: impl Into<String>) -> Self {
        Self {
            store,
            stream: stream.into(),
            last_saved: None,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Load the saved cursor (`None` if the stream never checkpointed).
    pub async fn load_cursor(&mut self) -> Result<Option<BlockNumber>, CrawlError> {
        let cursor = self.store.load(&self.stream).await?.map(|cp| cp.block_number);
        self.last_saved = cursor;
        Ok(cursor)
    }

    /// Persist `block_number` as the new cursor.
    pub async fn save_cursor(&mut self, block_number: BlockNumber) -> Result<(), CrawlError> {
        if let Some(last) = self.last_saved {
            if block_number < last {
                tracing::warn!(
                    stream = %self.stream,
                    last,
                    block_number,
                    "Refusing to move cursor backwards"
                );
                return Ok(());
            }
        }
        self.store.save(Checkpoint::now(&self.stream, block_number)).await?;
        self.last_saved = Some(block_number);
        Ok(())
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory progress store for tests and ephemeral crawls.
#[derive(Default)]
pub struct MemoryProgressStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a cursor for `stream`.
    pub fn with_cursor(stream: impl Into<String>, block_number: BlockNumber) -> Self {
        let store = Self::default();
        let cp = Checkpoint::now(stream, block_number);
        store.lock().insert(cp.stream.clone(), cp);
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Checkpoint>> {
        // A poisoned map is still consistent: every write is a single insert/remove.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, stream: &str) -> Result<Option<Checkpoint>, CrawlError> {
        Ok(self.lock().get(stream).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CrawlError> {
        self.lock().insert(checkpoint.stream.clone(), checkpoint);
        Ok(())
    }

    async fn delete(&self, stream: &str) -> Result<(), CrawlError> {
        self.lock().remove(stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = Arc::new(MemoryProgressStore::new());
        let mut progress = ProgressTracker::new(store.clone(), "ethereum:usdc");

        assert!(progress.load_cursor().await.unwrap().is_none());

        progress.save_cursor(1000).await.unwrap();

        let cp = store.load("ethereum:usdc").await.unwrap().unwrap();
        assert_eq!(cp.block_number, 1000);
        assert_eq!(cp.stream, "ethereum:usdc");
        assert!(cp.updated_at > 0);
    }

    #[tokio::test]
    async fn cursor_never_moves_backwards() {
        let store = Arc::new(MemoryProgressStore::with_cursor("s", 50));
        let mut progress = ProgressTracker::new(store.clone(), "s");
        assert_eq!(progress.load_cursor().await.unwrap(), Some(50));

        progress.save_cursor(40).await.unwrap();
        assert_eq!(store.load("s").await.unwrap().unwrap().block_number, 50);

        progress.save_cursor(60).await.unwrap();
        assert_eq!(store.load("s").await.unwrap().unwrap().block_number, 60);
    }

    #[tokio::test]
    async fn streams_are_independent() {
        let store = MemoryProgressStore::new();
        store.save(Checkpoint::now("a", 1)).await.unwrap();
        store.save(Checkpoint::now("b", 2)).await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
        assert_eq!(store.load("b").await.unwrap().unwrap().block_number, 2);
    }
}
